//! Monitor Application
//!
//! Captures the microphone and streams it to every listener that connects.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use child_monitor::{
    audio::{list_devices, CaptureDevice, CpalCaptureDevice, ToneCapture},
    config::AppConfig,
    constants::EVENT_CHANNEL_CAPACITY,
    discovery::LocalDirectory,
    events::EventSink,
    network::BroadcastServer,
    ui::{spawn_event_pump, Role, StatusBoard, WebServer},
};

#[derive(Parser, Debug)]
#[command(name = "monitor", version, about = "Stream a microphone to listeners on the LAN")]
struct Args {
    /// Config file (defaults to the per-user config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// First port to try; overrides the config
    #[arg(short, long)]
    port: Option<u16>,

    /// Broadcast a 440 Hz tone instead of the microphone
    #[arg(long)]
    test_tone: bool,

    /// Print audio devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Do not start the status API
    #[arg(long)]
    no_ui: bool,

    /// Port for the status API
    #[arg(long)]
    http_port: Option<u16>,
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

    if args.list_devices {
        print_devices();
        return Ok(());
    }

    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.monitor.base_port = port;
    }
    if let Some(http_port) = args.http_port {
        config.ui.http_port = http_port;
    }

    tracing::info!("Starting Child Monitor on {}", config.monitor.device_model);

    let capture: Arc<dyn CaptureDevice> = if args.test_tone {
        tracing::info!("Broadcasting test tone");
        Arc::new(ToneCapture::default())
    } else {
        Arc::new(CpalCaptureDevice::new(config.audio.input_device.clone()))
    };

    let (events, event_rx) = EventSink::channel(EVENT_CHANNEL_CAPACITY);
    let board = StatusBoard::new(Role::Monitor);
    let _pump = spawn_event_pump(event_rx, board.clone())?;

    if config.ui.enabled && !args.no_ui {
        let _web_handle = WebServer::new(config.ui.clone(), board, None).start_background();
    }

    let server = Arc::new(BroadcastServer::new(
        config.monitor.clone(),
        capture,
        Arc::new(LocalDirectory::new()),
        events,
    ));
    server.start()?;

    tracing::info!("Monitoring - press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down");
    let stopping = server.clone();
    tokio::task::spawn_blocking(move || stopping.stop()).await?;
    Ok(())
}

fn print_devices() {
    println!("\n=== Available Audio Devices ===");
    for device in list_devices() {
        let device_type = match (device.is_input, device.is_output) {
            (true, true) => "Input/Output",
            (true, false) => "Input",
            (false, true) => "Output",
            _ => "Unknown",
        };
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {} ({}){}:", device.name, device_type, default_marker);
        println!("    ID: {}", device.id);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();
}
