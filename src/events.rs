//! Status events from the streaming core to whoever hosts it
//!
//! Emission never blocks: events are dropped when the observer falls behind.
//! Marshaling onto a UI thread is the observer's job.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::Serialize;
use std::net::SocketAddr;

/// A status change or notification from the monitor or listener
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Listener is starting a connection attempt
    Connecting { attempt: u32, max_attempts: u32 },
    /// Listener reached the monitor
    Connected { peer: SocketAddr },
    /// Listener's stream ended after audio was delivered
    Disconnected,
    /// Monitor accepted a listener
    Streaming { peer: SocketAddr },
    /// Monitor evicted a listener whose write failed
    ClientLeft { peer: SocketAddr },
    /// Monitor has no listeners
    WaitingForListener,
    /// Monitor's service was advertised
    Registered { name: String, port: u16 },
    /// Listener decoded and played one chunk
    Update,
    /// Listener gave up after exhausting its attempts
    Error { message: String },
}

/// Non-blocking sender half for [`StreamEvent`]s
#[derive(Clone)]
pub struct EventSink {
    tx: Option<Sender<StreamEvent>>,
}

impl EventSink {
    /// Create a sink and the receiver an observer drains
    pub fn channel(capacity: usize) -> (Self, Receiver<StreamEvent>) {
        let (tx, rx) = bounded(capacity);
        (Self { tx: Some(tx) }, rx)
    }

    /// Sink that discards everything
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: StreamEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::trace!("Observer behind, dropped {:?}", event);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_never_blocks_when_full() {
        let (sink, rx) = EventSink::channel(2);
        for _ in 0..10 {
            sink.emit(StreamEvent::Update);
        }
        assert_eq!(rx.try_iter().count(), 2);
    }

    #[test]
    fn test_emit_after_observer_dropped() {
        let (sink, rx) = EventSink::channel(2);
        drop(rx);
        sink.emit(StreamEvent::Disconnected);
        EventSink::disabled().emit(StreamEvent::Disconnected);
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_value(StreamEvent::Registered {
            name: "ChildMonitor on Pixel".into(),
            port: 10001,
        })
        .unwrap();
        assert_eq!(json["event"], "registered");
        assert_eq!(json["port"], 10001);
    }
}
