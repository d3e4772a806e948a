use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use cardhive_core::models::{FindMediaFilesQuery, MediaFileResponse, Pagination};
use serde::Serialize;

use crate::error::HttpAppError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct MediaListResponse {
    pub data: Vec<MediaFileResponse>,
    pub pagination: Pagination,
}

/// List media files with optional filters, sorted by creation time.
#[tracing::instrument(skip(state, query))]
pub async fn list_media(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FindMediaFilesQuery>,
) -> Result<Json<MediaListResponse>, HttpAppError> {
    let (data, pagination) = state.media.find(&query).await?;
    Ok(Json(MediaListResponse { data, pagination }))
}
