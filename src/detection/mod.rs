//! Live accident detection session.
//!
//! One camera at a time is streamed to the detection backend over a WebSocket.
//! [`SessionController`] owns the connection, the frame pipeline and the timers
//! of that session and folds everything the backend says into a
//! [`DetectionSession`]. [`DetectionService`] runs the controller on a tokio task
//! and hands out a [`DetectionHandle`] for the HTTP layer.

pub mod canvas;
pub mod catalog;
pub mod controller;
pub mod pipeline;
pub mod protocol;
pub mod service;
pub mod socket;
pub mod state;
pub mod timers;
pub mod video;

#[cfg(test)]
mod testing;

pub use canvas::SharedCanvas;
pub use catalog::{eligible_camera, eligible_cameras, CameraCatalog};
pub use controller::{Event, EventSink, SessionController};
pub use pipeline::{build_pipeline, FramePipeline};
pub use service::{Components, DetectionHandle, DetectionService};
pub use state::{ConnectionStatus, DetectionSession, LogEntry, SessionPhase, SessionSnapshot};
