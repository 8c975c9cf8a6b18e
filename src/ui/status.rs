//! Status board fed by the streaming core's events

use chrono::{DateTime, Utc};
use crossbeam_channel::Receiver;
use parking_lot::RwLock;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::events::StreamEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Monitor,
    Listener,
}

/// What a host shows about the running monitor or listener
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub role: Role,
    pub phase: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub peers: Vec<SocketAddr>,
    pub chunks_played: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl StatusSnapshot {
    fn new(role: Role) -> Self {
        Self {
            role,
            phase: "Starting".to_string(),
            service_name: None,
            port: None,
            peers: Vec::new(),
            chunks_played: 0,
            last_update: None,
            error: None,
            started_at: Utc::now(),
        }
    }
}

/// Shared, cheaply cloned view of the current status
#[derive(Clone)]
pub struct StatusBoard {
    inner: Arc<RwLock<StatusSnapshot>>,
}

impl StatusBoard {
    pub fn new(role: Role) -> Self {
        Self {
            inner: Arc::new(RwLock::new(StatusSnapshot::new(role))),
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.inner.read().clone()
    }

    /// Fold one event into the board
    pub fn apply(&self, event: &StreamEvent) {
        let mut status = self.inner.write();
        match event {
            StreamEvent::Connecting {
                attempt,
                max_attempts,
            } => {
                status.phase = format!("Connecting ({}/{})", attempt, max_attempts);
                status.error = None;
            }
            StreamEvent::Connected { peer } => {
                status.phase = "Connected".to_string();
                status.peers = vec![*peer];
            }
            StreamEvent::Disconnected => {
                status.phase = "Disconnected".to_string();
                status.peers.clear();
            }
            StreamEvent::Streaming { peer } => {
                status.phase = "Streaming".to_string();
                if !status.peers.contains(peer) {
                    status.peers.push(*peer);
                }
            }
            StreamEvent::ClientLeft { peer } => {
                status.peers.retain(|p| p != peer);
            }
            StreamEvent::WaitingForListener => {
                status.phase = "Waiting for listener".to_string();
                status.peers.clear();
            }
            StreamEvent::Registered { name, port } => {
                status.service_name = Some(name.clone());
                status.port = Some(*port);
            }
            StreamEvent::Update => {
                status.phase = "Listening".to_string();
                status.chunks_played += 1;
                status.last_update = Some(Utc::now());
            }
            StreamEvent::Error { message } => {
                status.phase = "Error".to_string();
                status.peers.clear();
                status.error = Some(message.clone());
            }
        }
    }
}

/// Drain `events` into `board` on a background thread until every sender is gone
pub fn spawn_event_pump(
    events: Receiver<StreamEvent>,
    board: StatusBoard,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("status-pump".to_string())
        .spawn(move || {
            for event in events.iter() {
                tracing::debug!("Status event: {:?}", event);
                board.apply(&event);
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventSink;

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([192, 168, 1, 20], port))
    }

    #[test]
    fn test_monitor_events() {
        let board = StatusBoard::new(Role::Monitor);
        board.apply(&StreamEvent::Registered {
            name: "ChildMonitor on Pixel".into(),
            port: 10001,
        });
        board.apply(&StreamEvent::WaitingForListener);
        board.apply(&StreamEvent::Streaming { peer: peer(1) });
        board.apply(&StreamEvent::Streaming { peer: peer(2) });
        board.apply(&StreamEvent::ClientLeft { peer: peer(1) });

        let status = board.snapshot();
        assert_eq!(status.service_name.as_deref(), Some("ChildMonitor on Pixel"));
        assert_eq!(status.port, Some(10001));
        assert_eq!(status.phase, "Streaming");
        assert_eq!(status.peers, vec![peer(2)]);

        board.apply(&StreamEvent::WaitingForListener);
        assert!(board.snapshot().peers.is_empty());
    }

    #[test]
    fn test_listener_events() {
        let board = StatusBoard::new(Role::Listener);
        board.apply(&StreamEvent::Connecting {
            attempt: 1,
            max_attempts: 3,
        });
        assert_eq!(board.snapshot().phase, "Connecting (1/3)");

        board.apply(&StreamEvent::Connected { peer: peer(10000) });
        board.apply(&StreamEvent::Update);
        board.apply(&StreamEvent::Update);
        let status = board.snapshot();
        assert_eq!(status.chunks_played, 2);
        assert!(status.last_update.is_some());

        board.apply(&StreamEvent::Error {
            message: "unreachable".into(),
        });
        let status = board.snapshot();
        assert_eq!(status.phase, "Error");
        assert_eq!(status.error.as_deref(), Some("unreachable"));
    }

    #[test]
    fn test_pump_stops_when_senders_drop() {
        let board = StatusBoard::new(Role::Listener);
        let (sink, rx) = EventSink::channel(8);
        let pump = spawn_event_pump(rx, board.clone()).unwrap();

        sink.emit(StreamEvent::Disconnected);
        drop(sink);
        pump.join().unwrap();

        assert_eq!(board.snapshot().phase, "Disconnected");
    }
}
