//! Network subsystem: TCP fan-out on the monitor, retrying playback on the listener

pub mod connector;
pub mod receiver;
pub mod registry;
pub mod server;

pub use connector::{ConnectorState, ListenOutcome, ListenSession, RetryingConnector};
pub use receiver::{SessionEnd, SessionEndReason, StreamReceiver};
pub use registry::{BroadcastOutcome, ClientConnection, ClientRegistry};
pub use server::BroadcastServer;
