//! Traits the worker pool and the upload handler are wired through.
//!
//! The worker pool holds a weak reference to the handler and calls
//! `handle` for every claimed job, so dropping the handler (during
//! shutdown) stops processing without tearing down the queue.

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use cardhive_core::models::{MediaFile, MediaFileStatus, UploadJob};
use cardhive_core::{AppError, JobError};
use cardhive_db::MediaFileRepository;

/// Executes one claimed upload job.
///
/// `final_attempt` is true when the retry policy allows no further
/// attempt after this one; the handler uses it to decide whether the
/// staged file must be removed on failure.
#[async_trait]
pub trait UploadJobHandler: Send + Sync {
    async fn handle(self: Arc<Self>, job: &UploadJob, final_attempt: bool) -> Result<(), JobError>;
}

/// Media record persistence as the upload handler sees it.
///
/// Only the lifecycle transitions the handler performs; intake and
/// listing stay on the concrete repository.
#[async_trait]
pub trait MediaFileStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<MediaFile>, AppError>;

    async fn update_progress(
        &self,
        id: Uuid,
        progress: i32,
        status: MediaFileStatus,
    ) -> Result<Option<MediaFile>, AppError>;

    async fn mark_completed(
        &self,
        id: Uuid,
        e_tag: Option<&str>,
        url: &str,
        size: i64,
    ) -> Result<Option<MediaFile>, AppError>;

    async fn mark_failed(&self, id: Uuid, progress: i32) -> Result<Option<MediaFile>, AppError>;
}

#[async_trait]
impl MediaFileStore for MediaFileRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<MediaFile>, AppError> {
        MediaFileRepository::find_by_id(self, id).await
    }

    async fn update_progress(
        &self,
        id: Uuid,
        progress: i32,
        status: MediaFileStatus,
    ) -> Result<Option<MediaFile>, AppError> {
        MediaFileRepository::update_progress(self, id, progress, status).await
    }

    async fn mark_completed(
        &self,
        id: Uuid,
        e_tag: Option<&str>,
        url: &str,
        size: i64,
    ) -> Result<Option<MediaFile>, AppError> {
        MediaFileRepository::mark_completed(self, id, e_tag, url, size).await
    }

    async fn mark_failed(&self, id: Uuid, progress: i32) -> Result<Option<MediaFile>, AppError> {
        MediaFileRepository::mark_failed(self, id, progress).await
    }
}
