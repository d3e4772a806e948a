//! Media intake and read-side service
//!
//! Intake creates the media record, primes the progress cache, and hands
//! the staged file to the upload queue; nothing in the request path talks
//! to object storage. Reads serve records from the database and progress
//! from the cache with a database fallback.

use std::time::Duration;

use cardhive_cache::ProgressCache;
use cardhive_core::models::{
    CreateMediaUpload, FindMediaFilesQuery, MediaFileResponse, Pagination, ProgressSnapshot,
    UploadJobPayload,
};
use cardhive_core::upload::{build_object_key, merge_metadata};
use cardhive_core::AppError;
use cardhive_db::MediaFileRepository;
use cardhive_worker::UploadQueue;
use uuid::Uuid;
use validator::Validate;

use crate::staging::StagedFile;

/// Delay before the single retry of a progress read that failed at the
/// database.
const PROGRESS_READ_RETRY: Duration = Duration::from_millis(50);

#[derive(Clone)]
pub struct MediaService {
    media_files: MediaFileRepository,
    queue: UploadQueue,
    cache: ProgressCache,
    bucket: String,
}

impl MediaService {
    pub fn new(
        media_files: MediaFileRepository,
        queue: UploadQueue,
        cache: ProgressCache,
        bucket: String,
    ) -> Self {
        Self {
            media_files,
            queue,
            cache,
            bucket,
        }
    }

    /// Accept a staged upload: validate the payload, create the record,
    /// and enqueue the background transfer.
    ///
    /// On any failure before the job is enqueued the staged file is
    /// discarded here; once the job exists, cleanup belongs to the worker.
    #[tracing::instrument(
        skip(self, staged, payload),
        fields(file_name = %staged.file_name, size_bytes = staged.size, user_id = ?user_id)
    )]
    pub async fn upload_file(
        &self,
        staged: StagedFile,
        payload: CreateMediaUpload,
        user_id: Option<Uuid>,
    ) -> Result<MediaFileResponse, AppError> {
        if let Err(e) = payload.validate() {
            staged.discard().await;
            return Err(e.into());
        }

        let key = build_object_key(&staged.file_name, payload.folder.as_deref());
        let metadata = merge_metadata(&payload);

        let record = match self
            .media_files
            .create(
                &self.bucket,
                &key,
                &staged.file_name,
                &staged.content_type,
                staged.size as i64,
                metadata.as_ref(),
                user_id,
            )
            .await
        {
            Ok(record) => record,
            Err(e) => {
                staged.discard().await;
                return Err(e);
            }
        };

        // Prime the cache so the first progress poll hits without waiting
        // for the worker.
        self.cache.set(&record.to_snapshot()).await;

        let job_payload = UploadJobPayload {
            media_file_id: record.id,
            file_path: staged.path.display().to_string(),
            file_name: staged.file_name.clone(),
            content_type: staged.content_type.clone(),
            size: staged.size as i64,
        };

        if let Err(e) = self.queue.submit(&job_payload).await {
            tracing::error!(media_file_id = %record.id, error = %e, "Failed to enqueue upload, rolling back intake");
            match self.media_files.mark_failed(record.id, 0).await {
                Ok(Some(failed)) => self.cache.set(&failed.to_snapshot()).await,
                Ok(None) => {}
                Err(db_err) => {
                    tracing::warn!(media_file_id = %record.id, error = %db_err, "Failed to mark record failed after enqueue error");
                }
            }
            staged.discard().await;
            return Err(AppError::Internal(format!(
                "Failed to schedule upload: {}",
                e
            )));
        }

        tracing::info!(
            media_file_id = %record.id,
            key = %record.key,
            "Upload accepted and queued"
        );

        Ok(record.to_response())
    }

    /// List media files with filters and pagination.
    pub async fn find(
        &self,
        query: &FindMediaFilesQuery,
    ) -> Result<(Vec<MediaFileResponse>, Pagination), AppError> {
        let (rows, pagination) = self.media_files.find_many(query).await?;
        Ok((rows.iter().map(|r| r.to_response()).collect(), pagination))
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<MediaFileResponse, AppError> {
        let record = self
            .media_files
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("media file {}", id)))?;
        Ok(record.to_response())
    }

    /// Current upload progress, cache-first.
    ///
    /// A cache miss reads the record and repopulates the cache. The
    /// database read is retried once, so a transient failure during an
    /// active upload does not surface as an error to a polling client.
    pub async fn get_progress(&self, id: Uuid) -> Result<ProgressSnapshot, AppError> {
        if let Some(snapshot) = self.cache.get(id).await {
            return Ok(snapshot);
        }

        let record = match self.media_files.find_by_id(id).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(media_file_id = %id, error = %e, "Progress read failed, retrying once");
                tokio::time::sleep(PROGRESS_READ_RETRY).await;
                self.media_files.find_by_id(id).await?
            }
        };

        let record = record.ok_or_else(|| AppError::NotFound(format!("media file {}", id)))?;
        let snapshot = record.to_snapshot();
        self.cache.set(&snapshot).await;
        Ok(snapshot)
    }
}
