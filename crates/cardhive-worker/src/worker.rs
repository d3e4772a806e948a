//! Upload job handler
//!
//! Streams a staged file to object storage, persisting gated progress to
//! the media record and the snapshot cache along the way. The staged file
//! is removed on success, and on failure only when no attempt remains.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use cardhive_cache::ProgressCache;
use cardhive_core::models::{MediaFile, MediaFileStatus, UploadJob};
use cardhive_core::upload::{calculate_percent, to_storage_metadata};
use cardhive_core::JobError;
use cardhive_storage::{ObjectStorage, ProgressFn, StorageError, UploadOutcome};

use crate::context::{MediaFileStore, UploadJobHandler};
use crate::gate::ProgressGate;

/// Minimum percent movement between persisted progress writes.
const PROGRESS_STEP: i32 = 5;

/// Size of the progress event channel. Events arrive once per completed
/// part, so the channel only fills when persistence stalls; dropped events
/// are absorbed by the gate.
const PROGRESS_CHANNEL_CAPACITY: usize = 32;

fn classify_storage_error(err: StorageError) -> JobError {
    match err {
        // Nothing about the environment will change between attempts.
        StorageError::ConfigError(_) => JobError::unrecoverable(err),
        _ => JobError::recoverable(err),
    }
}

pub struct UploadWorker {
    media_files: Arc<dyn MediaFileStore>,
    storage: Arc<dyn ObjectStorage>,
    cache: ProgressCache,
}

impl UploadWorker {
    pub fn new(
        media_files: Arc<dyn MediaFileStore>,
        storage: Arc<dyn ObjectStorage>,
        cache: ProgressCache,
    ) -> Self {
        Self {
            media_files,
            storage,
            cache,
        }
    }

    /// Persist one gated progress value and refresh the snapshot cache.
    /// Both writes are best-effort; the transfer never stops because a
    /// progress write failed.
    async fn persist_progress(
        media_files: &Arc<dyn MediaFileStore>,
        cache: &ProgressCache,
        media_file_id: uuid::Uuid,
        percent: i32,
    ) {
        let status = if percent == 100 {
            MediaFileStatus::Completed
        } else {
            MediaFileStatus::Uploading
        };

        match media_files
            .update_progress(media_file_id, percent, status)
            .await
        {
            Ok(Some(record)) => cache.set(&record.to_snapshot()).await,
            Ok(None) => {
                tracing::warn!(%media_file_id, "Media record vanished during upload");
            }
            Err(e) => {
                tracing::warn!(%media_file_id, error = %e, "Failed to persist upload progress");
            }
        }
    }

    /// Run the transfer itself: open the staged file, wire up progress
    /// reporting, and stream to storage. `last_persisted` tracks the most
    /// recent gate-admitted percent, the baseline a failure transition
    /// reports.
    async fn run_upload(
        &self,
        job: &UploadJob,
        record: &MediaFile,
        last_persisted: Arc<AtomicI32>,
    ) -> Result<UploadOutcome, JobError> {
        let file = match tokio::fs::File::open(&job.file_path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // The staged bytes are gone; no retry can succeed.
                return Err(JobError::unrecoverable(anyhow::anyhow!(
                    "staged file {} is missing: {}",
                    job.file_path,
                    e
                )));
            }
            Err(e) => return Err(JobError::recoverable(e)),
        };

        let declared_size = (job.size > 0).then_some(job.size as u64);

        let (progress_tx, mut progress_rx) = mpsc::channel::<i32>(PROGRESS_CHANNEL_CAPACITY);
        let persist_task = {
            let media_files = Arc::clone(&self.media_files);
            let cache = self.cache.clone();
            let media_file_id = record.id;
            let last_persisted = Arc::clone(&last_persisted);
            tokio::spawn(async move {
                let mut gate = ProgressGate::new(PROGRESS_STEP);
                while let Some(percent) = progress_rx.recv().await {
                    if !gate.admit(percent) {
                        continue;
                    }
                    last_persisted.store(percent, Ordering::Relaxed);
                    Self::persist_progress(&media_files, &cache, media_file_id, percent).await;
                }
            })
        };

        let progress_fn: ProgressFn = Arc::new(move |transfer| {
            let total = transfer.total_bytes.or(declared_size).unwrap_or(0);
            let Some(percent) = calculate_percent(transfer.loaded_bytes, total) else {
                return;
            };
            // Dropped events are fine, a later event carries a larger value.
            let _ = progress_tx.try_send(percent);
        });

        let result = self
            .storage
            .upload_multipart(
                &record.key,
                Box::pin(file),
                &job.content_type,
                to_storage_metadata(record.metadata.as_ref()),
                declared_size,
                Some(progress_fn),
            )
            .await;

        // The storage client dropped its progress handle, so the channel is
        // closed; wait for in-flight progress writes before the terminal
        // transition.
        if persist_task.await.is_err() {
            tracing::warn!(media_file_id = %record.id, "Progress persistence task panicked");
        }

        result.map_err(classify_storage_error)
    }

    async fn remove_staged_file(path: &str) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path, error = %e, "Failed to remove staged file");
            }
        }
    }
}

#[async_trait]
impl UploadJobHandler for UploadWorker {
    #[tracing::instrument(
        skip(self, job),
        fields(job_id = %job.id, media_file_id = %job.media_file_id, file_name = %job.file_name)
    )]
    async fn handle(self: Arc<Self>, job: &UploadJob, final_attempt: bool) -> Result<(), JobError> {
        let record = match self.media_files.find_by_id(job.media_file_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                // The record was deleted after enqueueing; the job has
                // nothing left to do.
                tracing::warn!("Media record no longer exists, discarding upload job");
                Self::remove_staged_file(&job.file_path).await;
                return Ok(());
            }
            Err(e) => return Err(JobError::recoverable(anyhow::Error::from(e))),
        };

        let last_persisted = Arc::new(AtomicI32::new(0));
        let result = self
            .run_upload(job, &record, Arc::clone(&last_persisted))
            .await;

        match result {
            Ok(outcome) => {
                let url = outcome
                    .location
                    .unwrap_or_else(|| self.storage.public_url(&record.key));
                let size = outcome.size as i64;

                match self
                    .media_files
                    .mark_completed(record.id, outcome.e_tag.as_deref(), &url, size)
                    .await
                {
                    Ok(Some(updated)) => self.cache.set(&updated.to_snapshot()).await,
                    Ok(None) => {
                        tracing::warn!("Media record vanished before completion");
                    }
                    // The object is in storage; retrying the job re-uploads
                    // to the same key and tries the transition again.
                    Err(e) => return Err(JobError::recoverable(anyhow::Error::from(e))),
                }

                Self::remove_staged_file(&job.file_path).await;

                tracing::info!(
                    key = %record.key,
                    size_bytes = size,
                    "Upload finished"
                );
                Ok(())
            }
            Err(e) => {
                if final_attempt || !e.is_recoverable() {
                    Self::remove_staged_file(&job.file_path).await;
                }

                // The failed record keeps the last percent that made it to
                // the database, not a value observed mid-flight.
                let progress = last_persisted.load(Ordering::Relaxed).clamp(0, 100);
                match self.media_files.mark_failed(record.id, progress).await {
                    Ok(Some(updated)) => self.cache.set(&updated.to_snapshot()).await,
                    Ok(None) => {}
                    Err(db_err) => {
                        // A terminal transition that did not stick must
                        // surface, so a retry can re-run it.
                        tracing::error!(error = %db_err, "Failed to record the upload failure");
                        return Err(JobError::recoverable(
                            anyhow::Error::from(db_err)
                                .context(format!("upload failed: {}", e)),
                        ));
                    }
                }

                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::pin::Pin;
    use std::sync::Mutex;

    use chrono::Utc;
    use tokio::io::{AsyncRead, AsyncReadExt};
    use uuid::Uuid;

    use cardhive_core::models::UploadJobStatus;
    use cardhive_core::AppError;
    use cardhive_storage::{StorageResult, TransferProgress};

    #[test]
    fn config_errors_are_not_retried() {
        let err = classify_storage_error(StorageError::ConfigError("no bucket".to_string()));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn transient_errors_are_retried() {
        let err = classify_storage_error(StorageError::UploadFailed("reset".to_string()));
        assert!(err.is_recoverable());
        let err = classify_storage_error(StorageError::IoError(std::io::Error::other("eof")));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn removing_a_missing_staged_file_is_silent() {
        // NotFound is swallowed, anything else only warns; either way this
        // returns without panicking.
        UploadWorker::remove_staged_file("/tmp/definitely-not-there-cardhive").await;
    }

    /// Record store backed by a single in-memory row, recording every
    /// progress write it receives.
    struct InMemoryStore {
        record: Mutex<Option<MediaFile>>,
        progress_writes: Mutex<Vec<i32>>,
        fail_terminal_writes: bool,
    }

    impl InMemoryStore {
        fn with_record(record: MediaFile) -> Arc<Self> {
            Arc::new(Self {
                record: Mutex::new(Some(record)),
                progress_writes: Mutex::new(Vec::new()),
                fail_terminal_writes: false,
            })
        }

        fn empty() -> Arc<Self> {
            Arc::new(Self {
                record: Mutex::new(None),
                progress_writes: Mutex::new(Vec::new()),
                fail_terminal_writes: false,
            })
        }

        fn failing_terminal_writes(record: MediaFile) -> Arc<Self> {
            Arc::new(Self {
                record: Mutex::new(Some(record)),
                progress_writes: Mutex::new(Vec::new()),
                fail_terminal_writes: true,
            })
        }

        fn record(&self) -> Option<MediaFile> {
            self.record.lock().unwrap().clone()
        }

        fn writes(&self) -> Vec<i32> {
            self.progress_writes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MediaFileStore for InMemoryStore {
        async fn find_by_id(&self, id: Uuid) -> Result<Option<MediaFile>, AppError> {
            Ok(self.record.lock().unwrap().clone().filter(|r| r.id == id))
        }

        async fn update_progress(
            &self,
            _id: Uuid,
            progress: i32,
            status: MediaFileStatus,
        ) -> Result<Option<MediaFile>, AppError> {
            self.progress_writes.lock().unwrap().push(progress);
            let mut guard = self.record.lock().unwrap();
            if let Some(record) = guard.as_mut() {
                record.progress = progress;
                record.status = status;
                record.updated_at = Utc::now();
            }
            Ok(guard.clone())
        }

        async fn mark_completed(
            &self,
            _id: Uuid,
            e_tag: Option<&str>,
            url: &str,
            size: i64,
        ) -> Result<Option<MediaFile>, AppError> {
            if self.fail_terminal_writes {
                return Err(AppError::Internal("record store unavailable".to_string()));
            }
            let mut guard = self.record.lock().unwrap();
            if let Some(record) = guard.as_mut() {
                record.status = MediaFileStatus::Completed;
                record.progress = 100;
                record.e_tag = e_tag.map(str::to_string);
                record.url = Some(url.to_string());
                record.size = size;
                record.updated_at = Utc::now();
            }
            Ok(guard.clone())
        }

        async fn mark_failed(
            &self,
            _id: Uuid,
            progress: i32,
        ) -> Result<Option<MediaFile>, AppError> {
            if self.fail_terminal_writes {
                return Err(AppError::Internal("record store unavailable".to_string()));
            }
            let mut guard = self.record.lock().unwrap();
            if let Some(record) = guard.as_mut() {
                record.status = MediaFileStatus::Failed;
                record.progress = progress;
                record.updated_at = Utc::now();
            }
            Ok(guard.clone())
        }
    }

    /// Storage double that consumes the stream in fixed-size parts and
    /// emits one progress event per part, optionally failing after a set
    /// number of parts.
    struct ScriptedStorage {
        bucket: String,
        part_size: usize,
        fail_after_parts: Option<usize>,
    }

    impl ScriptedStorage {
        fn succeeding(part_size: usize) -> Arc<Self> {
            Arc::new(Self {
                bucket: "cards".to_string(),
                part_size,
                fail_after_parts: None,
            })
        }

        fn failing_after(part_size: usize, parts: usize) -> Arc<Self> {
            Arc::new(Self {
                bucket: "cards".to_string(),
                part_size,
                fail_after_parts: Some(parts),
            })
        }
    }

    #[async_trait]
    impl ObjectStorage for ScriptedStorage {
        async fn upload_multipart(
            &self,
            _key: &str,
            mut reader: Pin<Box<dyn AsyncRead + Send + Unpin>>,
            _content_type: &str,
            _metadata: HashMap<String, String>,
            declared_size: Option<u64>,
            progress: Option<ProgressFn>,
        ) -> StorageResult<UploadOutcome> {
            let mut loaded = 0u64;
            let mut parts = 0usize;
            let mut buf = vec![0u8; self.part_size];
            loop {
                let mut filled = 0;
                while filled < self.part_size {
                    let n = reader.read(&mut buf[filled..]).await?;
                    if n == 0 {
                        break;
                    }
                    filled += n;
                }
                if filled == 0 {
                    break;
                }
                parts += 1;
                if let Some(limit) = self.fail_after_parts {
                    if parts > limit {
                        return Err(StorageError::UploadFailed("connection reset".to_string()));
                    }
                }
                loaded += filled as u64;
                if let Some(cb) = progress.as_ref() {
                    cb(TransferProgress {
                        loaded_bytes: loaded,
                        total_bytes: declared_size,
                    });
                }
                if filled < self.part_size {
                    break;
                }
            }
            Ok(UploadOutcome {
                e_tag: Some("\"d41d8cd9\"".to_string()),
                location: None,
                size: loaded,
            })
        }

        async fn delete_object(&self, _key: &str) -> StorageResult<()> {
            Ok(())
        }

        fn bucket(&self) -> &str {
            &self.bucket
        }

        fn public_url(&self, key: &str) -> String {
            format!("https://{}.s3.test/{}", self.bucket, key)
        }
    }

    fn record_of_size(size: i64) -> MediaFile {
        let id = Uuid::new_v4();
        let now = Utc::now();
        MediaFile {
            id,
            bucket: "cards".to_string(),
            key: format!("uploads/{}-card.png", id),
            file_name: "card.png".to_string(),
            content_type: "image/png".to_string(),
            size,
            status: MediaFileStatus::Initialized,
            progress: 0,
            e_tag: None,
            url: None,
            metadata: None,
            user_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn job_for(record: &MediaFile, file_path: &str, attempts: i32, max_attempts: i32) -> UploadJob {
        let now = Utc::now();
        UploadJob {
            id: Uuid::new_v4(),
            media_file_id: record.id,
            file_path: file_path.to_string(),
            file_name: record.file_name.clone(),
            content_type: record.content_type.clone(),
            size: record.size,
            status: UploadJobStatus::Running,
            attempts,
            max_attempts,
            run_at: now,
            last_error: None,
            failed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn stage_file(dir: &tempfile::TempDir, len: usize) -> String {
        let path = dir.path().join("staged.bin");
        std::fs::write(&path, vec![7u8; len]).unwrap();
        path.to_string_lossy().into_owned()
    }

    async fn quiet_cache() -> ProgressCache {
        ProgressCache::connect(None, 60).await
    }

    #[tokio::test]
    async fn upload_success_completes_record_and_unlinks_staged_file() {
        let dir = tempfile::tempdir().unwrap();
        // 12 KiB in 5 KiB parts: three parts, progress 41 / 83 / 100.
        let path = stage_file(&dir, 12 * 1024);
        let record = record_of_size(12 * 1024);
        let key = record.key.clone();
        let store = InMemoryStore::with_record(record.clone());
        let worker = Arc::new(UploadWorker::new(
            store.clone() as Arc<dyn MediaFileStore>,
            ScriptedStorage::succeeding(5 * 1024) as Arc<dyn ObjectStorage>,
            quiet_cache().await,
        ));

        let job = job_for(&record, &path, 1, 3);
        worker.handle(&job, false).await.expect("upload succeeds");

        let updated = store.record().expect("record kept");
        assert_eq!(updated.status, MediaFileStatus::Completed);
        assert_eq!(updated.progress, 100);
        assert_eq!(updated.e_tag.as_deref(), Some("\"d41d8cd9\""));
        assert_eq!(
            updated.url.as_deref(),
            Some(format!("https://cards.s3.test/{}", key).as_str())
        );
        assert_eq!(updated.size, 12 * 1024);
        assert!(!std::path::Path::new(&path).exists());

        // Persisted sequence is gated: strictly increasing, each step at
        // least the gate width apart (or the final 100), ending at 100.
        let writes = store.writes();
        assert_eq!(writes, vec![41, 83, 100]);
        for pair in writes.windows(2) {
            assert!(pair[1] > pair[0]);
            assert!(pair[1] - pair[0] >= PROGRESS_STEP || pair[1] == 100);
        }
    }

    #[tokio::test]
    async fn failure_on_final_attempt_marks_failed_and_unlinks_staged_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = stage_file(&dir, 12 * 1024);
        let record = record_of_size(12 * 1024);
        let store = InMemoryStore::with_record(record.clone());
        let worker = Arc::new(UploadWorker::new(
            store.clone() as Arc<dyn MediaFileStore>,
            // One part lands (41%), the second breaks the transfer.
            ScriptedStorage::failing_after(5 * 1024, 1) as Arc<dyn ObjectStorage>,
            quiet_cache().await,
        ));

        let job = job_for(&record, &path, 3, 3);
        let err = worker.handle(&job, true).await.unwrap_err();
        assert!(err.is_recoverable());

        let updated = store.record().expect("record kept");
        assert_eq!(updated.status, MediaFileStatus::Failed);
        assert_eq!(updated.progress, 41);
        assert!(!std::path::Path::new(&path).exists());
    }

    #[tokio::test]
    async fn failure_progress_is_the_last_persisted_value_not_the_last_observed() {
        let dir = tempfile::tempdir().unwrap();
        // 2 KiB parts of a 100 KiB stream move 2% per part, below the gate
        // width, so nothing is ever persisted even though 4% was observed.
        let path = stage_file(&dir, 100 * 1024);
        let record = record_of_size(100 * 1024);
        let store = InMemoryStore::with_record(record.clone());
        let worker = Arc::new(UploadWorker::new(
            store.clone() as Arc<dyn MediaFileStore>,
            ScriptedStorage::failing_after(2 * 1024, 2) as Arc<dyn ObjectStorage>,
            quiet_cache().await,
        ));

        let job = job_for(&record, &path, 1, 3);
        let err = worker.handle(&job, false).await.unwrap_err();
        assert!(err.is_recoverable());

        let updated = store.record().expect("record kept");
        assert_eq!(updated.status, MediaFileStatus::Failed);
        assert_eq!(updated.progress, 0);
        assert!(store.writes().is_empty());
        // Attempts remain and the error is retryable, so the staged bytes
        // stay for the next attempt.
        assert!(std::path::Path::new(&path).exists());
    }

    #[tokio::test]
    async fn terminal_store_failure_is_propagated() {
        let dir = tempfile::tempdir().unwrap();
        let path = stage_file(&dir, 12 * 1024);
        let record = record_of_size(12 * 1024);
        let store = InMemoryStore::failing_terminal_writes(record.clone());
        let worker = Arc::new(UploadWorker::new(
            store.clone() as Arc<dyn MediaFileStore>,
            ScriptedStorage::failing_after(5 * 1024, 0) as Arc<dyn ObjectStorage>,
            quiet_cache().await,
        ));

        let job = job_for(&record, &path, 1, 3);
        let err = worker.handle(&job, false).await.unwrap_err();
        assert!(err.is_recoverable());
        let chain = format!("{:#}", err.into_inner());
        assert!(chain.contains("upload failed"));
        assert!(chain.contains("record store unavailable"));
    }

    #[tokio::test]
    async fn missing_record_discards_job_and_staged_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = stage_file(&dir, 1024);
        let record = record_of_size(1024);
        let worker = Arc::new(UploadWorker::new(
            InMemoryStore::empty() as Arc<dyn MediaFileStore>,
            ScriptedStorage::succeeding(5 * 1024) as Arc<dyn ObjectStorage>,
            quiet_cache().await,
        ));

        let job = job_for(&record, &path, 1, 3);
        worker.handle(&job, false).await.expect("job is discarded");
        assert!(!std::path::Path::new(&path).exists());
    }
}
