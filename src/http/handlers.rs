//! HTTP request handlers
//!
//! JSON endpoints for the station: buffers, now playing, queue, library and
//! listeners.

use axum::{extract::State, http::StatusCode, Json};
use radio_core::{BufferStatus, Catalog, Performance, PerformanceId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{Result, ServerError};
use crate::state::AppState;

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "OK"
}

/// Version endpoint
pub async fn version_check() -> &'static str {
    concat!("radio-server v", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Serialize)]
pub struct BufferStatusResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mp3_stream: Option<BufferStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<BufferStatus>,
}

/// GET /api/status/buffers
pub async fn buffer_status(State(state): State<Arc<AppState>>) -> Json<BufferStatusResponse> {
    let (mp3_stream, scheduler) = state.station.buffer_status();
    Json(BufferStatusResponse {
        mp3_stream,
        scheduler,
    })
}

/// GET /api/now-playing
pub async fn now_playing(State(state): State<Arc<AppState>>) -> Result<Json<Performance>> {
    state
        .station
        .now_playing()
        .map(|p| Json(Performance::clone(&p)))
        .ok_or_else(|| ServerError::NotFound("nothing is playing yet".to_string()))
}

#[derive(Debug, Serialize)]
pub struct QueueResponse {
    pub queue: Vec<Performance>,
}

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub id: String,
}

fn queue_snapshot(state: &AppState) -> QueueResponse {
    let library = state.station.library();
    let queue = state
        .station
        .scheduler()
        .queue()
        .iter()
        .filter_map(|id| library.performance(id))
        .collect();
    QueueResponse { queue }
}

/// GET /api/queue
pub async fn get_queue(State(state): State<Arc<AppState>>) -> Json<QueueResponse> {
    Json(queue_snapshot(&state))
}

/// POST /api/queue
pub async fn enqueue(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EnqueueRequest>,
) -> Result<(StatusCode, Json<QueueResponse>)> {
    let id = request.id.trim();
    if id.is_empty() {
        return Err(ServerError::BadRequest("missing performance id".to_string()));
    }
    state
        .station
        .scheduler()
        .enqueue(PerformanceId(id.to_string()))?;
    Ok((StatusCode::CREATED, Json(queue_snapshot(&state))))
}

#[derive(Debug, Serialize)]
pub struct LibraryResponse {
    pub count: usize,
    pub performances: Vec<Performance>,
}

/// GET /api/library
pub async fn library(State(state): State<Arc<AppState>>) -> Json<LibraryResponse> {
    let performances = state.station.library().performances();
    Json(LibraryResponse {
        count: performances.len(),
        performances,
    })
}

/// Rescan the library directory
/// POST /api/library/refresh
pub async fn refresh_library(State(state): State<Arc<AppState>>) -> Result<Json<LibraryResponse>> {
    let scanner = state.clone();
    tokio::task::spawn_blocking(move || scanner.station.library().refresh())
        .await
        .map_err(|e| ServerError::Internal(e.to_string()))??;
    Ok(library(State(state)).await)
}

/// Debug endpoint - connected listeners
pub async fn active_listeners(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let listeners: Vec<_> = state
        .sessions
        .iter()
        .map(|entry| serde_json::to_value(entry.value().as_ref()).unwrap_or_default())
        .collect();

    Json(serde_json::json!({
        "count": listeners.len(),
        "listeners": listeners,
    }))
}
