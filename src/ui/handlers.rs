//! HTTP API handlers

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::audio::device::list_devices;
use crate::audio::AudioDeviceInfo;
use crate::ui::server::AppState;
use crate::ui::status::StatusSnapshot;

/// Entries returned by `/api/volume` when no limit is given
const DEFAULT_VOLUME_LIMIT: usize = 512;

/// API response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Get the current status
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<ApiResponse<StatusSnapshot>> {
    Json(ApiResponse::ok(state.board.snapshot()))
}

#[derive(Debug, Deserialize)]
pub struct VolumeQuery {
    pub limit: Option<usize>,
}

/// Recent volume summaries, oldest first
#[derive(Debug, Serialize)]
pub struct VolumeLevels {
    pub capacity: usize,
    pub levels: Vec<f32>,
}

/// Get the newest volume history entries
pub async fn get_volume(
    State(state): State<Arc<AppState>>,
    Query(query): Query<VolumeQuery>,
) -> (StatusCode, Json<ApiResponse<VolumeLevels>>) {
    let Some(history) = &state.history else {
        return (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error("volume history is only kept by a listener")),
        );
    };

    let levels = VolumeLevels {
        capacity: history.capacity(),
        levels: history.recent(query.limit.unwrap_or(DEFAULT_VOLUME_LIMIT)),
    };
    (StatusCode::OK, Json(ApiResponse::ok(levels)))
}

/// Get available audio devices
pub async fn get_devices() -> Json<ApiResponse<Vec<AudioDeviceInfo>>> {
    let devices = tokio::task::spawn_blocking(list_devices)
        .await
        .unwrap_or_default();
    Json(ApiResponse::ok(devices))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::StreamEvent;
    use crate::ui::status::{Role, StatusBoard};
    use crate::volume::VolumeHistory;

    fn listener_state() -> Arc<AppState> {
        let history = Arc::new(VolumeHistory::new(8));
        for level in 1..=5 {
            history.append(&[level * 100; 16]);
        }
        Arc::new(AppState {
            board: StatusBoard::new(Role::Listener),
            history: Some(history),
        })
    }

    #[tokio::test]
    async fn test_status_reflects_board() {
        let state = listener_state();
        state.board.apply(&StreamEvent::Update);

        let Json(response) = get_status(State(state)).await;
        assert!(response.success);
        assert_eq!(response.data.unwrap().chunks_played, 1);
    }

    #[tokio::test]
    async fn test_volume_limit() {
        let query = VolumeQuery { limit: Some(2) };
        let (status, Json(response)) = get_volume(State(listener_state()), Query(query)).await;

        assert_eq!(status, StatusCode::OK);
        let volume = response.data.unwrap();
        assert_eq!(volume.capacity, 8);
        assert_eq!(volume.levels, vec![400.0, 500.0]);
    }

    #[tokio::test]
    async fn test_volume_on_monitor_is_not_found() {
        let state = Arc::new(AppState {
            board: StatusBoard::new(Role::Monitor),
            history: None,
        });
        let (status, Json(response)) = get_volume(State(state), Query(VolumeQuery { limit: None })).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(!response.success);
        assert!(response.error.is_some());
    }
}
