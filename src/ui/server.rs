//! Status web server

use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::config::UiConfig;
use crate::ui::handlers;
use crate::ui::status::StatusBoard;
use crate::volume::VolumeHistory;

/// Shared state passed to all request handlers
pub struct AppState {
    pub board: StatusBoard,
    /// Present on a listener only
    pub history: Option<Arc<VolumeHistory>>,
}

pub struct WebServer {
    config: UiConfig,
    state: Arc<AppState>,
}

impl WebServer {
    pub fn new(config: UiConfig, board: StatusBoard, history: Option<Arc<VolumeHistory>>) -> Self {
        Self {
            config,
            state: Arc::new(AppState { board, history }),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/status", get(handlers::get_status))
            .route("/api/volume", get(handlers::get_volume))
            .route("/api/devices", get(handlers::get_devices))
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    pub fn address(&self) -> SocketAddr {
        SocketAddr::new(self.config.bind_address, self.config.http_port)
    }

    /// Serve until the task is dropped or the socket fails
    pub async fn serve(self) -> std::io::Result<()> {
        let addr = self.address();
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Status API available at http://{}", listener.local_addr()?);
        axum::serve(listener, self.router()).await
    }

    /// Run [`serve`](Self::serve) on the current runtime
    pub fn start_background(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.serve().await {
                tracing::error!("Status API stopped: {}", e);
            }
        })
    }
}
