pub mod api;
pub mod config;
pub mod db;
pub mod detection;
pub mod error;
pub mod messaging;

// Re-export main components for easier use
pub use detection::{DetectionHandle, DetectionService, SessionSnapshot};
pub use error::Error;
