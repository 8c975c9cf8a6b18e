//! Status API for hosting the monitor or listener

pub mod handlers;
pub mod server;
pub mod status;

pub use server::WebServer;
pub use status::{spawn_event_pump, Role, StatusBoard, StatusSnapshot};
