pub mod rest;
pub mod websocket;

pub use rest::{AppState, RestApi};
