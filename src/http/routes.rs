//! Axum router configuration

use axum::{
    http::{header, Method},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

use super::handlers::{
    active_listeners, buffer_status, enqueue, get_queue, health_check, library, now_playing,
    refresh_library, version_check,
};
use super::streams::{mp3_stream, wav_stream};

/// Create the Axum router with all routes
pub fn create_router(state: Arc<AppState>) -> Router {
    let router = Router::new()
        // Health and version endpoints
        .route("/health", get(health_check))
        .route("/version", get(version_check))
        // Live streams
        .route("/stream.mp3", get(mp3_stream))
        .route("/stream.wav", get(wav_stream))
        // API
        .route("/api/status/buffers", get(buffer_status))
        .route("/api/now-playing", get(now_playing))
        .route("/api/queue", get(get_queue).post(enqueue))
        .route("/api/library", get(library))
        .route("/api/library/refresh", post(refresh_library))
        // Debug endpoints
        .route("/debug/listeners", get(active_listeners));

    let router = if state.config.cors_enabled {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS, Method::HEAD])
            .allow_headers([header::ACCEPT, header::CONTENT_TYPE, header::ORIGIN])
            .max_age(Duration::from_secs(3600));
        router.layer(cors)
    } else {
        router
    };

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
