use std::sync::Arc;

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use cardhive_core::models::CreateMediaUpload;
use cardhive_core::AppError;
use uuid::Uuid;

use crate::error::HttpAppError;
use crate::staging::{stage_field, StagedFile};
use crate::state::AppState;

/// Upload media handler
///
/// Accepts one `file` part plus optional descriptive parts: `title`,
/// `description`, `folder`, `tags` (comma-separated), `metadata` (JSON
/// object) and `userID`. The file is staged locally and the transfer to
/// object storage runs in the background; the response carries the record
/// in `INITIALIZED` state with an `id` to poll progress on.
#[tracing::instrument(skip(state, multipart))]
pub async fn upload_media(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, HttpAppError> {
    let (staged, payload, user_id) = match parse_upload_request(&state, &mut multipart).await {
        Ok(parts) => parts,
        Err((staged, e)) => {
            if let Some(staged) = staged {
                staged.discard().await;
            }
            return Err(e.into());
        }
    };

    let response = state.media.upload_file(staged, payload, user_id).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

type ParseError = (Option<StagedFile>, AppError);

/// Walk the multipart stream, staging the file part and collecting the
/// descriptive fields. On error the already-staged file (if any) is handed
/// back so the caller can discard it.
async fn parse_upload_request(
    state: &AppState,
    multipart: &mut Multipart,
) -> Result<(StagedFile, CreateMediaUpload, Option<Uuid>), ParseError> {
    let mut staged: Option<StagedFile> = None;
    let mut payload = CreateMediaUpload::default();
    let mut user_id: Option<Uuid> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return Err((
                    staged,
                    AppError::InvalidInput(format!("Malformed multipart body: {}", e)),
                ));
            }
        };

        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                if staged.is_some() {
                    return Err((
                        staged,
                        AppError::InvalidInput("only one file part is allowed".to_string()),
                    ));
                }
                let mut field = field;
                match stage_field(
                    &state.config.staging_dir,
                    &mut field,
                    state.config.max_upload_size_bytes as u64,
                )
                .await
                {
                    Ok(file) => staged = Some(file),
                    Err(e) => return Err((staged, e)),
                }
            }
            "title" => payload.title = read_text(&mut staged, field).await?,
            "description" => payload.description = read_text(&mut staged, field).await?,
            "folder" => payload.folder = read_text(&mut staged, field).await?,
            "tags" => {
                if let Some(raw) = read_text(&mut staged, field).await? {
                    let tags: Vec<String> = raw
                        .split(',')
                        .map(str::trim)
                        .filter(|t| !t.is_empty())
                        .map(str::to_string)
                        .collect();
                    payload.tags = (!tags.is_empty()).then_some(tags);
                }
            }
            "metadata" => {
                if let Some(raw) = read_text(&mut staged, field).await? {
                    match serde_json::from_str(&raw) {
                        Ok(map) => payload.metadata = Some(map),
                        Err(e) => {
                            return Err((
                                staged,
                                AppError::InvalidInput(format!(
                                    "metadata must be a JSON object: {}",
                                    e
                                )),
                            ));
                        }
                    }
                }
            }
            "userID" => {
                if let Some(raw) = read_text(&mut staged, field).await? {
                    match Uuid::parse_str(&raw) {
                        Ok(id) => user_id = Some(id),
                        Err(e) => return Err((staged, e.into())),
                    }
                }
            }
            // Unknown parts are drained and ignored.
            _ => {}
        }
    }

    match staged {
        Some(staged) => Ok((staged, payload, user_id)),
        None => Err((
            None,
            AppError::InvalidInput("file field is required".to_string()),
        )),
    }
}

async fn read_text(
    staged: &mut Option<StagedFile>,
    field: axum::extract::multipart::Field<'_>,
) -> Result<Option<String>, ParseError> {
    match field.text().await {
        Ok(text) if text.is_empty() => Ok(None),
        Ok(text) => Ok(Some(text)),
        Err(e) => Err((
            staged.take(),
            AppError::InvalidInput(format!("Malformed multipart field: {}", e)),
        )),
    }
}
