//! Listener Application
//!
//! Connects to a monitor and plays its stream, retrying a few times first.

use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use child_monitor::{
    audio::{CpalPlaybackDevice, PlaybackDevice, ToneAlert},
    config::AppConfig,
    constants::{DEFAULT_LISTENER_HTTP_PORT, EVENT_CHANNEL_CAPACITY},
    events::EventSink,
    network::{ListenOutcome, ListenSession},
    ui::{spawn_event_pump, Role, StatusBoard, WebServer},
};

#[derive(Parser, Debug)]
#[command(name = "listener", version, about = "Play the stream of a child monitor")]
struct Args {
    /// Monitor host name or address
    host: String,

    /// Monitor port
    port: u16,

    /// Config file (defaults to the per-user config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Do not start the status API
    #[arg(long)]
    no_ui: bool,

    /// Port for the status API
    #[arg(long, default_value_t = DEFAULT_LISTENER_HTTP_PORT)]
    http_port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let mut config = AppConfig::load(args.config.as_deref())?;
    config.ui.http_port = args.http_port;

    tracing::info!("Listening to {}:{}", args.host, args.port);

    let playback: Arc<dyn PlaybackDevice> =
        Arc::new(CpalPlaybackDevice::new(config.audio.output_device.clone()));
    let alert = Arc::new(ToneAlert::new(playback.clone()));

    let (events, event_rx) = EventSink::channel(EVENT_CHANNEL_CAPACITY);
    let board = StatusBoard::new(Role::Listener);
    let _pump = spawn_event_pump(event_rx, board.clone())?;

    let session = Arc::new(ListenSession::start(
        args.host.clone(),
        args.port,
        &config.listener,
        playback,
        alert,
        events,
    )?);

    if config.ui.enabled && !args.no_ui {
        let _web_handle =
            WebServer::new(config.ui.clone(), board, Some(session.history())).start_background();
    }

    let mut waiter = {
        let session = session.clone();
        tokio::task::spawn_blocking(move || session.wait())
    };

    let outcome = tokio::select! {
        outcome = &mut waiter => outcome?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
            let stopping = session.clone();
            tokio::task::spawn_blocking(move || stopping.stop()).await?;
            waiter.await?
        }
    };

    match outcome {
        ListenOutcome::Streamed { chunks } => {
            tracing::info!("Monitor disconnected after {} chunks", chunks);
            Ok(())
        }
        ListenOutcome::Cancelled => Ok(()),
        ListenOutcome::GivenUp { attempts } => {
            // Let the alert finish before exiting
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            bail!("Could not reach {}:{} after {} attempts", args.host, args.port, attempts)
        }
    }
}
