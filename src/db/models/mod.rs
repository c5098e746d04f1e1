pub mod camera_models;

pub use camera_models::{Camera, CameraDb, CameraInput, CameraStatus};
