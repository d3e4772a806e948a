use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use cardhive_core::models::{MediaFileResponse, ProgressSnapshot};
use uuid::Uuid;

use crate::error::HttpAppError;
use crate::state::AppState;

/// Fetch one media file record by id.
#[tracing::instrument(skip(state), fields(media_file_id = %id))]
pub async fn get_media(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<MediaFileResponse>, HttpAppError> {
    let response = state.media.get_by_id(id).await?;
    Ok(Json(response))
}

/// Fetch the live upload progress for a media file. Served from the
/// snapshot cache when possible, the record otherwise.
#[tracing::instrument(skip(state), fields(media_file_id = %id))]
pub async fn get_media_progress(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ProgressSnapshot>, HttpAppError> {
    let snapshot = state.media.get_progress(id).await?;
    Ok(Json(snapshot))
}
