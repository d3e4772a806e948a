use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// Upload lifecycle state of a media file.
///
/// `INITIALIZED` is set at intake; the worker moves the record to
/// `UPLOADING` on the first persisted progress write and finally to
/// `COMPLETED` or `FAILED`. No transition re-enters `INITIALIZED`.
/// `FAILED` rows are consumed (deleted) later by the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "media_file_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum MediaFileStatus {
    Initialized,
    Uploading,
    Completed,
    Failed,
}

/// A media file record.
///
/// `bucket`/`key` are assigned at creation and never change afterwards,
/// even across upload retries. On a `FAILED` record, `size` and `e_tag`
/// keep their last-known values: `size` is the declared intake size,
/// unverified against storage.
#[derive(Debug, Clone, FromRow)]
pub struct MediaFile {
    pub id: Uuid,
    pub bucket: String,
    pub key: String,
    pub file_name: String,
    pub content_type: String,
    pub size: i64,
    pub status: MediaFileStatus,
    pub progress: i32,
    pub e_tag: Option<String>,
    pub url: Option<String>,
    pub metadata: Option<JsonValue>,
    pub user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MediaFile {
    /// Public projection returned to API clients.
    pub fn to_response(&self) -> MediaFileResponse {
        MediaFileResponse {
            id: self.id,
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            url: self.url.clone(),
            file_name: self.file_name.clone(),
            content_type: self.content_type.clone(),
            size: self.size,
            status: self.status,
            progress: self.progress,
            metadata: self.metadata.clone(),
            user_id: self.user_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// Read-optimized projection for the progress cache. The record remains
    /// authoritative; a snapshot can always be rebuilt from it.
    pub fn to_snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            id: self.id,
            status: self.status,
            progress: self.progress,
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            url: self.url.clone(),
            updated_at: self.updated_at,
        }
    }
}

/// Public media file DTO (camelCase to match the API contract).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFileResponse {
    pub id: Uuid,
    pub bucket: String,
    pub key: String,
    pub url: Option<String>,
    pub file_name: String,
    pub content_type: String,
    pub size: i64,
    pub status: MediaFileStatus,
    pub progress: i32,
    pub metadata: Option<JsonValue>,
    #[serde(rename = "userID")]
    pub user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Latest progress state of one upload, as stored in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub id: Uuid,
    pub status: MediaFileStatus,
    pub progress: i32,
    pub bucket: String,
    pub key: String,
    pub url: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Descriptive payload accompanying an upload.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateMediaUpload {
    #[validate(length(max = 255))]
    pub title: Option<String>,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<serde_json::Map<String, JsonValue>>,
    #[validate(length(max = 512))]
    pub folder: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Filter/pagination query for listing media files.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindMediaFilesQuery {
    pub status: Option<MediaFileStatus>,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    #[serde(rename = "userID")]
    pub user_id: Option<Uuid>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub size_min: Option<i64>,
    pub size_max: Option<i64>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub order: Option<SortOrder>,
}

/// Pagination metadata returned alongside list results.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub total_pages: i64,
}
