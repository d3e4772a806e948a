use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Json, Router,
};
use tower_http::trace::TraceLayer;

use crate::handlers::{get_media, get_media_progress, list_media, upload_media};
use crate::state::AppState;

/// Slack added to the body limit to cover multipart framing and the
/// descriptive fields accompanying the file.
const BODY_LIMIT_SLACK_BYTES: usize = 1024 * 1024;

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.max_upload_size_bytes + BODY_LIMIT_SLACK_BYTES;

    Router::new()
        .route("/health", get(health))
        .route("/media/upload", post(upload_media))
        .route("/media", get(list_media))
        .route("/media/{id}", get(get_media))
        .route("/media/{id}/progress", get(get_media_progress))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
