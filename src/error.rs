//! Error types for the audio monitor

use std::net::SocketAddr;

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Stream closed")]
    Closed,

    #[error("cpal error: {0}")]
    CpalError(String),
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind on port {port} failed: {source}")]
    BindFailed {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not resolve {0}")]
    Unresolved(String),

    #[error("Connection to {addr} failed: {source}")]
    ConnectionFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    #[error("Timeout")]
    Timeout,
}

/// Directory service errors
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Registration of {name} failed: {reason}")]
    RegistrationFailed { name: String, reason: String },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
