//! Monitor side: capture, encode and fan out to every connected listener
//!
//! A supervising thread repeats the cycle bind → register → accept + capture
//! → cleanup until the server is stopped. Binding moves up one port at a time
//! until it succeeds, and the port actually bound is what gets advertised.

use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::audio::{AudioFormat, CaptureDevice};
use crate::cancel::{Generation, SessionToken};
use crate::codec;
use crate::config::MonitorConfig;
use crate::constants::{
    ACCEPT_POLL_INTERVAL, BIND_RETRY_PAUSE, CAPTURE_CHUNK_SAMPLES, CLIENT_WRITE_TIMEOUT,
    CYCLE_RESTART_PAUSE, SERVICE_NAME_PREFIX, SERVICE_TYPE,
};
use crate::discovery::{DirectoryService, Registration, ServiceInfo};
use crate::error::{NetworkError, Result};
use crate::events::{EventSink, StreamEvent};
use crate::network::registry::{ClientConnection, ClientRegistry};

const LISTEN_BACKLOG: i32 = 16;

/// State shared between the server handle and its threads for one start/stop
struct BroadcastSession {
    registry: Arc<ClientRegistry>,
    /// Port of the current listening socket, 0 while unbound
    bound_port: AtomicU16,
    /// Closed flag of the current listening socket
    listener_closed: Mutex<Option<Arc<AtomicBool>>>,
}

impl BroadcastSession {
    fn new() -> Self {
        Self {
            registry: Arc::new(ClientRegistry::new()),
            bound_port: AtomicU16::new(0),
            listener_closed: Mutex::new(None),
        }
    }

    fn close_listener(&self) {
        if let Some(closed) = self.listener_closed.lock().as_ref() {
            closed.store(true, Ordering::SeqCst);
        }
    }
}

struct Running {
    session: Arc<BroadcastSession>,
    supervisor: JoinHandle<()>,
}

/// Everything the supervising loop needs, moved into its thread
struct Supervisor {
    config: MonitorConfig,
    capture: Arc<dyn CaptureDevice>,
    directory: Arc<dyn DirectoryService>,
    events: EventSink,
    session: Arc<BroadcastSession>,
    token: SessionToken,
}

/// Broadcasts captured audio to any number of listeners
pub struct BroadcastServer {
    config: MonitorConfig,
    capture: Arc<dyn CaptureDevice>,
    directory: Arc<dyn DirectoryService>,
    events: EventSink,
    generation: Generation,
    running: Mutex<Option<Running>>,
}

impl BroadcastServer {
    pub fn new(
        config: MonitorConfig,
        capture: Arc<dyn CaptureDevice>,
        directory: Arc<dyn DirectoryService>,
        events: EventSink,
    ) -> Self {
        Self {
            config,
            capture,
            directory,
            events,
            generation: Generation::new(),
            running: Mutex::new(None),
        }
    }

    /// Start the supervising loop; does nothing if it is already running
    pub fn start(&self) -> Result<()> {
        let mut running = self.running.lock();
        if let Some(current) = running.as_ref() {
            if !current.supervisor.is_finished() {
                return Ok(());
            }
        }

        let session = Arc::new(BroadcastSession::new());
        let supervisor = Supervisor {
            config: self.config.clone(),
            capture: self.capture.clone(),
            directory: self.directory.clone(),
            events: self.events.clone(),
            session: session.clone(),
            token: self.generation.advance(),
        };

        let handle = thread::Builder::new()
            .name("monitor-supervisor".to_string())
            .spawn(move || supervisor.run())?;

        tracing::info!("Monitor started");
        *running = Some(Running {
            session,
            supervisor: handle,
        });
        Ok(())
    }

    /// Stop streaming and wait for every thread to exit
    pub fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };

        self.generation.advance();
        running.session.close_listener();
        running.session.registry.clear();

        if running.supervisor.join().is_err() {
            tracing::error!("Monitor supervisor panicked");
        }
        tracing::info!("Monitor stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .map(|r| !r.supervisor.is_finished())
            .unwrap_or(false)
    }

    /// Port currently listened on, if bound
    pub fn bound_port(&self) -> Option<u16> {
        let running = self.running.lock();
        let port = running.as_ref()?.session.bound_port.load(Ordering::SeqCst);
        (port != 0).then_some(port)
    }

    pub fn client_count(&self) -> usize {
        self.running
            .lock()
            .as_ref()
            .map(|r| r.session.registry.len())
            .unwrap_or(0)
    }
}

impl Drop for BroadcastServer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Supervisor {
    fn run(self) {
        let mut port = self.config.base_port;

        while self.token.is_valid() {
            let listener = match bind_listener(self.config.bind_address, port) {
                Ok(listener) => listener,
                Err(e) => {
                    if self.token.is_valid() {
                        let next = next_port(port, self.config.base_port);
                        tracing::warn!("{}; trying port {}", e, next);
                        port = next;
                        self.token.sleep(BIND_RETRY_PAUSE);
                    }
                    continue;
                }
            };

            let bound = match listener.local_addr() {
                Ok(addr) => addr.port(),
                Err(e) => {
                    tracing::error!("Bound socket has no local address: {}", e);
                    self.token.sleep(CYCLE_RESTART_PAUSE);
                    continue;
                }
            };
            tracing::info!("Listening on {}:{}", self.config.bind_address, bound);

            let clean = self.run_cycle(listener, bound);
            self.session.bound_port.store(0, Ordering::SeqCst);

            if !clean && self.token.is_valid() {
                self.token.sleep(CYCLE_RESTART_PAUSE);
            }
        }
        tracing::debug!("Supervising loop exited");
    }

    /// One bind-to-cleanup cycle; returns false if it ended on an error
    fn run_cycle(&self, listener: TcpListener, port: u16) -> bool {
        self.session.bound_port.store(port, Ordering::SeqCst);

        let closed = Arc::new(AtomicBool::new(false));
        *self.session.listener_closed.lock() = Some(closed.clone());
        // A stop that raced the bind must still see the new listener closed
        if !self.token.is_valid() {
            closed.store(true, Ordering::SeqCst);
        }

        let _registration = self.register(port);

        let accept = {
            let registry = self.session.registry.clone();
            let events = self.events.clone();
            let closed = closed.clone();
            let token = self.token.clone();
            thread::Builder::new()
                .name("monitor-accept".to_string())
                .spawn(move || accept_loop(listener, &registry, &events, &closed, &token))
        };
        let accept = match accept {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!("Failed to start accept loop: {}", e);
                return false;
            }
        };

        let result = {
            let _cleanup = CycleCleanup {
                registry: &self.session.registry,
                events: &self.events,
                closed: &closed,
                accept: Some(accept),
            };
            self.capture_loop(&closed)
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Streaming cycle failed: {}", e);
                false
            }
        }
    }

    fn register(&self, port: u16) -> Option<Registration<'_>> {
        let service = ServiceInfo {
            name: format!("{} {}", SERVICE_NAME_PREFIX, self.config.device_model),
            service_type: SERVICE_TYPE.to_string(),
            port,
        };
        let events = self.events.clone();
        let registered = self.directory.register(
            service,
            Box::new(move |name| {
                events.emit(StreamEvent::Registered { name, port });
                events.emit(StreamEvent::WaitingForListener);
            }),
        );

        match registered {
            Ok(handle) => Some(Registration::new(self.directory.as_ref(), handle)),
            Err(e) => {
                tracing::error!("Service registration failed: {}", e);
                None
            }
        }
    }

    fn capture_loop(&self, closed: &AtomicBool) -> Result<()> {
        let registry = &self.session.registry;
        let mut source = self.capture.open(AudioFormat::STREAM)?;
        let mut codec = codec::stream_codec();
        let mut pcm = vec![0i16; CAPTURE_CHUNK_SAMPLES];
        let mut waiting = true;
        tracing::info!("Capture started");

        while self.token.is_valid() && !closed.load(Ordering::SeqCst) {
            let read = source.read(&mut pcm)?;
            if read == 0 {
                continue;
            }

            let encoded = codec.encode(&pcm[..read]);
            let outcome = registry.broadcast(&encoded);
            for peer in outcome.evicted {
                self.events.emit(StreamEvent::ClientLeft { peer });
            }

            if outcome.remaining == 0 {
                if !waiting {
                    self.events.emit(StreamEvent::WaitingForListener);
                }
                waiting = true;
            } else {
                waiting = false;
            }
        }

        tracing::info!("Capture stopped");
        Ok(())
    }
}

/// Ends a cycle however capture exits: stops accepting, then disconnects every listener
struct CycleCleanup<'a> {
    registry: &'a ClientRegistry,
    events: &'a EventSink,
    closed: &'a AtomicBool,
    accept: Option<JoinHandle<()>>,
}

impl Drop for CycleCleanup<'_> {
    fn drop(&mut self) {
        // No client may be added once the registry has been cleared
        self.closed.store(true, Ordering::SeqCst);
        if let Some(accept) = self.accept.take() {
            if accept.join().is_err() {
                tracing::error!("Accept loop panicked");
            }
        }

        let disconnected = self.registry.clear();
        tracing::info!("Capture cycle ended, {} listener(s) disconnected", disconnected);
        self.events.emit(StreamEvent::WaitingForListener);
    }
}

fn accept_loop(
    listener: TcpListener,
    registry: &ClientRegistry,
    events: &EventSink,
    closed: &AtomicBool,
    token: &SessionToken,
) {
    if let Err(e) = listener.set_nonblocking(true) {
        tracing::error!("Cannot poll listening socket: {}", e);
        closed.store(true, Ordering::SeqCst);
        return;
    }

    while !closed.load(Ordering::SeqCst) && token.is_valid() {
        match listener.accept() {
            Ok((stream, peer)) => {
                let configured = stream
                    .set_nonblocking(false)
                    .and_then(|_| stream.set_nodelay(true))
                    .and_then(|_| stream.set_write_timeout(Some(CLIENT_WRITE_TIMEOUT)));
                if let Err(e) = configured {
                    tracing::warn!("Dropping client {}: {}", peer, e);
                    continue;
                }

                registry.add(ClientConnection::new(stream, peer));
                tracing::info!("New client: {}", peer);
                events.emit(StreamEvent::Streaming { peer });
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                tracing::error!("Accepting clients failed: {}", e);
                break;
            }
        }
    }

    // Dropping the listener closes the socket; the capture loop sees the flag
    closed.store(true, Ordering::SeqCst);
}

/// Bind a listening TCP socket on `port`
fn bind_listener(ip: IpAddr, port: u16) -> std::result::Result<TcpListener, NetworkError> {
    let addr = SocketAddr::new(ip, port);
    let bind = || -> std::io::Result<TcpListener> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        // Windows lets SO_REUSEADDR steal a live port, which would defeat the port hunt
        #[cfg(not(windows))]
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(LISTEN_BACKLOG)?;
        Ok(socket.into())
    };
    bind().map_err(|source| NetworkError::BindFailed { port, source })
}

/// Candidate after `port` failed to bind; wraps back to `base` past the top
fn next_port(port: u16, base: u16) -> u16 {
    match port.checked_add(1) {
        Some(next) if port != 0 => next,
        _ => base,
    }
}
