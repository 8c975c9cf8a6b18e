//! # Child Monitor
//!
//! Live audio from one monitoring device to any number of listeners on the LAN.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                            MONITOR DEVICE                             │
//! │                                                                      │
//! │  ┌────────────┐   ┌────────────┐   ┌───────────────────────────────┐ │
//! │  │ Microphone │──▶│   mu-law   │──▶│ ClientRegistry::broadcast     │ │
//! │  │ PcmSource  │   │  encoder   │   │ (write all, evict on failure) │ │
//! │  └────────────┘   └────────────┘   └───────────────┬───────────────┘ │
//! │   capture/broadcast loop (supervising thread)       │   ▲            │
//! │                                                     │   │ add        │
//! │   ┌──────────────────────┐     ┌────────────────────┴───┴─────────┐  │
//! │   │ DirectoryService     │◀────│ BroadcastServer: bind (port++ on │  │
//! │   │ "ChildMonitor on X"  │     │ conflict) + accept sub-loop      │  │
//! │   └──────────────────────┘     └──────────────────────────────────┘  │
//! └──────────────────────────────────────┬───────────────────────────────┘
//!                                        │ raw TCP byte stream, one per listener
//!                                        ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                           LISTENER DEVICE                             │
//! │                                                                      │
//! │  ┌────────────────────────┐   ┌──────────────┐   ┌────────────────┐  │
//! │  │ RetryingConnector      │──▶│StreamReceiver│──▶│ Speaker PcmSink│  │
//! │  │ 3 attempts, 2s backoff │   │ mu-law decode│   └────────────────┘  │
//! │  └────────────────────────┘   └──────┬───────┘                       │
//! │                                      ▼                               │
//! │                              ┌──────────────┐   StreamEvent::Update  │
//! │                              │VolumeHistory │──▶ observers           │
//! │                              └──────────────┘                        │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod cancel;
pub mod codec;
pub mod config;
pub mod discovery;
pub mod error;
pub mod events;
pub mod network;
pub mod ui;
pub mod volume;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    use std::time::Duration;

    /// Sample rate shared by both ends of the stream
    pub const SAMPLE_RATE: u32 = 11025;

    /// Channel count shared by both ends of the stream (mono)
    pub const CHANNELS: u16 = 1;

    /// First port the monitor tries to bind
    pub const DEFAULT_MONITOR_PORT: u16 = 10000;

    /// Samples read from the capture source per broadcast chunk
    pub const CAPTURE_CHUNK_SAMPLES: usize = 1024;

    /// Bytes read from the socket per decode call on the listener
    pub const READ_BUFFER_BYTES: usize = 2048;

    /// Entries kept by the listener's volume history
    pub const VOLUME_HISTORY_CAPACITY: usize = 16384;

    /// Connection attempts before the listener gives up
    pub const MAX_CONNECT_ATTEMPTS: u32 = 3;

    /// Fixed pause between failed connection attempts
    pub const RETRY_BACKOFF: Duration = Duration::from_secs(2);

    /// Read timeout on an established listener connection
    pub const STREAM_READ_TIMEOUT: Duration = Duration::from_secs(30);

    /// Default connect timeout per attempt
    pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

    /// How often a pending connect is checked for completion or cancellation
    pub const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(10);

    /// Write timeout on each accepted client socket
    pub const CLIENT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

    /// How often the accept loop checks whether it was closed
    pub const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(20);

    /// Pause between bind attempts while hunting for a free port
    pub const BIND_RETRY_PAUSE: Duration = Duration::from_millis(10);

    /// Pause before a failed broadcast cycle is restarted
    pub const CYCLE_RESTART_PAUSE: Duration = Duration::from_secs(1);

    /// DNS-SD service type advertised by the monitor
    pub const SERVICE_TYPE: &str = "_childmonitor._tcp.";

    /// Prefix of the advertised service name; the device model follows
    pub const SERVICE_NAME_PREFIX: &str = "ChildMonitor on";

    /// Default HTTP port for the monitor's status API
    pub const DEFAULT_MONITOR_HTTP_PORT: u16 = 8080;

    /// Default HTTP port for the listener's status API
    pub const DEFAULT_LISTENER_HTTP_PORT: u16 = 8081;

    /// Capacity of the status event channel
    pub const EVENT_CHANNEL_CAPACITY: usize = 256;
}
