//! Listener side: connect to a monitor with bounded retries
//!
//! A session that never plays anything is a failed attempt and is retried.
//! Once audio has been played the connection counts as a success, and the
//! connector exits without reconnecting when it later drops.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use serde::Serialize;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, ErrorKind};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::{AlertSound, PlaybackDevice};
use crate::cancel::{Generation, SessionToken};
use crate::config::ListenerConfig;
use crate::constants::{
    CONNECT_POLL_INTERVAL, MAX_CONNECT_ATTEMPTS, RETRY_BACKOFF, STREAM_READ_TIMEOUT,
    VOLUME_HISTORY_CAPACITY,
};
use crate::error::{NetworkError, Result};
use crate::events::{EventSink, StreamEvent};
use crate::network::receiver::{SessionEndReason, StreamReceiver};
use crate::volume::VolumeHistory;

/// Where a connector currently is in its retry cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectorState {
    Idle,
    Connecting { attempt: u32 },
    Connected,
    Failed { attempt: u32 },
    GivenUp,
    Stopped,
}

/// How a listening session finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ListenOutcome {
    /// Audio was played; the stream then ended
    Streamed { chunks: u64 },
    /// Every attempt failed
    GivenUp { attempts: u32 },
    Cancelled,
}

/// Socket currently being read, so a stop can unblock it
type LiveStream = Arc<Mutex<Option<TcpStream>>>;

/// Connect-and-stream loop for one monitor
pub struct RetryingConnector {
    host: String,
    port: u16,
    connect_timeout: Duration,
    playback: Arc<dyn PlaybackDevice>,
    alert: Arc<dyn AlertSound>,
    events: EventSink,
    history: Arc<VolumeHistory>,
    token: SessionToken,
    state: Arc<Mutex<ConnectorState>>,
    live: LiveStream,
}

impl RetryingConnector {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        host: String,
        port: u16,
        config: &ListenerConfig,
        playback: Arc<dyn PlaybackDevice>,
        alert: Arc<dyn AlertSound>,
        events: EventSink,
        history: Arc<VolumeHistory>,
        token: SessionToken,
    ) -> Self {
        Self {
            host,
            port,
            connect_timeout: config.connect_timeout(),
            playback,
            alert,
            events,
            history,
            token,
            state: Arc::new(Mutex::new(ConnectorState::Idle)),
            live: Arc::new(Mutex::new(None)),
        }
    }

    fn set_state(&self, state: ConnectorState) {
        *self.state.lock() = state;
    }

    /// Run attempts until one plays audio, all fail, or the token is invalidated
    pub fn run(&self) -> ListenOutcome {
        let outcome = self.attempt_all();
        match outcome {
            ListenOutcome::Streamed { .. } => self.set_state(ConnectorState::Idle),
            ListenOutcome::GivenUp { .. } => self.set_state(ConnectorState::GivenUp),
            ListenOutcome::Cancelled => self.set_state(ConnectorState::Stopped),
        }
        outcome
    }

    fn attempt_all(&self) -> ListenOutcome {
        let mut attempts = 0;

        while attempts < MAX_CONNECT_ATTEMPTS {
            if !self.token.is_valid() {
                return ListenOutcome::Cancelled;
            }

            let attempt = attempts + 1;
            self.set_state(ConnectorState::Connecting { attempt });
            self.events.emit(StreamEvent::Connecting {
                attempt,
                max_attempts: MAX_CONNECT_ATTEMPTS,
            });
            tracing::info!(
                "Connecting to {}:{} (attempt {}/{})",
                self.host,
                self.port,
                attempt,
                MAX_CONNECT_ATTEMPTS
            );

            match self.connect() {
                Ok(None) => return ListenOutcome::Cancelled,
                Ok(Some(stream)) => {
                    if let Some(outcome) = self.stream(stream) {
                        return outcome;
                    }
                }
                Err(e) => tracing::warn!("Attempt {} failed: {}", attempt, e),
            }

            attempts = attempt;
            self.set_state(ConnectorState::Failed { attempt });
            if attempts < MAX_CONNECT_ATTEMPTS && !self.token.sleep(RETRY_BACKOFF) {
                return ListenOutcome::Cancelled;
            }
        }

        tracing::error!(
            "Giving up on {}:{} after {} attempts",
            self.host,
            self.port,
            attempts
        );
        self.alert.play();
        self.events.emit(StreamEvent::Error {
            message: format!("Could not reach {}:{}", self.host, self.port),
        });
        ListenOutcome::GivenUp { attempts }
    }

    /// Stream from a connected socket; `None` means the attempt failed
    fn stream(&self, stream: TcpStream) -> Option<ListenOutcome> {
        let peer = stream.peer_addr().ok();
        if let Err(e) = stream.set_read_timeout(Some(STREAM_READ_TIMEOUT)) {
            tracing::warn!("Cannot set read timeout: {}", e);
            return None;
        }

        if !self.publish(&stream) {
            return Some(ListenOutcome::Cancelled);
        }

        self.set_state(ConnectorState::Connected);
        if let Some(peer) = peer {
            tracing::info!("Connected to {}", peer);
            self.events.emit(StreamEvent::Connected { peer });
        }

        let receiver = StreamReceiver::new(
            self.playback.as_ref(),
            &self.history,
            &self.events,
            &self.token,
        );
        let end = receiver.run(&stream);

        self.live.lock().take();
        let _ = stream.shutdown(Shutdown::Both);

        if let SessionEndReason::Cancelled = end.reason {
            return Some(ListenOutcome::Cancelled);
        }
        if end.delivered_audio() {
            tracing::info!("Stream ended after {} chunks: {:?}", end.chunks_decoded, end.reason);
            self.events.emit(StreamEvent::Disconnected);
            return Some(ListenOutcome::Streamed {
                chunks: end.chunks_decoded,
            });
        }

        match end.reason {
            SessionEndReason::Failed(e) => tracing::warn!("Session failed before any audio: {}", e),
            _ => tracing::warn!("Monitor closed the connection before any audio"),
        }
        None
    }

    /// Expose the socket to `interrupt`; false if the token is already invalid
    fn publish(&self, stream: &TcpStream) -> bool {
        let mut live = self.live.lock();
        if !self.token.is_valid() {
            return false;
        }
        match stream.try_clone() {
            Ok(clone) => *live = Some(clone),
            Err(e) => tracing::warn!("Stream cannot be interrupted: {}", e),
        }
        true
    }

    /// Connect to the first reachable address; `None` means the token was invalidated
    fn connect(&self) -> std::result::Result<Option<TcpStream>, NetworkError> {
        let target = format!("{}:{}", self.host, self.port);
        let addrs: Vec<SocketAddr> = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|_| NetworkError::Unresolved(target.clone()))?
            .collect();

        let mut last_error = NetworkError::Unresolved(target);
        for addr in addrs {
            match self.connect_addr(addr) {
                Ok(connected) => return Ok(connected),
                Err(source) => last_error = NetworkError::ConnectionFailed { addr, source },
            }
        }
        Err(last_error)
    }

    /// Non-blocking connect, polled until it completes, times out or is cancelled
    fn connect_addr(&self, addr: SocketAddr) -> io::Result<Option<TcpStream>> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nonblocking(true)?;

        match socket.connect(&addr.into()) {
            Ok(()) => {}
            Err(e) if connect_failed_at_once(&e) => return Err(e),
            // Still in progress
            Err(_) => {}
        }

        let deadline = Instant::now() + self.connect_timeout;
        loop {
            if let Some(e) = socket.take_error()? {
                return Err(e);
            }
            if socket.peer_addr().is_ok() {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(io::Error::new(ErrorKind::TimedOut, "connect timed out"));
            }
            if !self.token.sleep(CONNECT_POLL_INTERVAL.min(deadline - now)) {
                return Ok(None);
            }
        }

        socket.set_nonblocking(false)?;
        Ok(Some(socket.into()))
    }
}

/// Errors a non-blocking connect reports directly instead of completing later
fn connect_failed_at_once(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::ConnectionRefused
            | ErrorKind::AddrNotAvailable
            | ErrorKind::AddrInUse
            | ErrorKind::PermissionDenied
            | ErrorKind::InvalidInput
            | ErrorKind::Unsupported
    )
}

/// Shut down the socket a connector is reading, if any
fn interrupt(live: &LiveStream) {
    if let Some(stream) = live.lock().take() {
        let _ = stream.shutdown(Shutdown::Both);
    }
}

/// A running listener: one connector thread plus what the host observes
pub struct ListenSession {
    generation: Generation,
    state: Arc<Mutex<ConnectorState>>,
    history: Arc<VolumeHistory>,
    live: LiveStream,
    handle: Mutex<Option<JoinHandle<()>>>,
    outcome_rx: Receiver<ListenOutcome>,
    outcome: Mutex<Option<ListenOutcome>>,
}

impl ListenSession {
    /// Spawn the connector for `host:port` and return at once
    pub fn start(
        host: impl Into<String>,
        port: u16,
        config: &ListenerConfig,
        playback: Arc<dyn PlaybackDevice>,
        alert: Arc<dyn AlertSound>,
        events: EventSink,
    ) -> Result<Self> {
        let generation = Generation::new();
        let history = Arc::new(VolumeHistory::new(VOLUME_HISTORY_CAPACITY));
        let connector = RetryingConnector::new(
            host.into(),
            port,
            config,
            playback,
            alert,
            events,
            history.clone(),
            generation.token(),
        );
        let state = connector.state.clone();
        let live = connector.live.clone();

        let (outcome_tx, outcome_rx) = bounded(1);
        let handle = thread::Builder::new()
            .name("listen-connector".to_string())
            .spawn(move || {
                let outcome = connector.run();
                tracing::info!("Listening finished: {:?}", outcome);
                let _ = outcome_tx.send(outcome);
            })?;

        Ok(Self {
            generation,
            state,
            history,
            live,
            handle: Mutex::new(Some(handle)),
            outcome_rx,
            outcome: Mutex::new(None),
        })
    }

    /// Cancel the session and wait for its thread to exit
    pub fn stop(&self) {
        self.generation.advance();
        interrupt(&self.live);
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                tracing::error!("Connector thread panicked");
            }
        }
    }

    /// Block until the session finishes
    pub fn wait(&self) -> ListenOutcome {
        let mut outcome = self.outcome.lock();
        if let Some(done) = *outcome {
            return done;
        }
        let done = self.outcome_rx.recv().unwrap_or(ListenOutcome::Cancelled);
        *outcome = Some(done);
        done
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`
    pub fn wait_timeout(&self, timeout: Duration) -> Option<ListenOutcome> {
        let mut outcome = self.outcome.lock();
        if outcome.is_none() {
            *outcome = match self.outcome_rx.recv_timeout(timeout) {
                Ok(done) => Some(done),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => Some(ListenOutcome::Cancelled),
            };
        }
        *outcome
    }

    pub fn state(&self) -> ConnectorState {
        *self.state.lock()
    }

    pub fn history(&self) -> Arc<VolumeHistory> {
        self.history.clone()
    }
}

impl Drop for ListenSession {
    fn drop(&mut self) {
        self.stop();
    }
}
