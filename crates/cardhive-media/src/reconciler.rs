//! Failed-upload reconciler
//!
//! Failed uploads leave two kinds of residue: `FAILED` media records and,
//! occasionally, partial objects in storage when an abort did not stick.
//! The reconciler periodically deletes the stored objects best-effort and
//! then purges the records. It runs with or without a storage client; the
//! record purge always happens.

use std::sync::Arc;
use std::time::Duration;

use cardhive_core::AppError;
use cardhive_db::MediaFileRepository;
use cardhive_storage::ObjectStorage;
use tokio::task::JoinHandle;

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// `FAILED` media records removed from the database.
    pub records_purged: u64,
    /// Objects removed from storage.
    pub objects_removed: u64,
}

pub struct FailedUploadReconciler {
    media_files: MediaFileRepository,
    storage: Option<Arc<dyn ObjectStorage>>,
    interval_secs: u64,
}

impl FailedUploadReconciler {
    pub fn new(
        media_files: MediaFileRepository,
        storage: Option<Arc<dyn ObjectStorage>>,
        interval_secs: u64,
    ) -> Self {
        Self {
            media_files,
            storage,
            interval_secs,
        }
    }

    /// Spawn the periodic reconciliation loop. The first pass runs after
    /// one full interval, not at startup.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let reconciler = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(reconciler.interval_secs));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            interval.tick().await;

            tracing::info!(
                interval_secs = reconciler.interval_secs,
                storage = reconciler.storage.is_some(),
                "Failed-upload reconciler started"
            );

            loop {
                interval.tick().await;
                match reconciler.run().await {
                    // Every pass reports its counts, including empty ones.
                    Ok(outcome) => {
                        tracing::info!(
                            records_purged = outcome.records_purged,
                            objects_removed = outcome.objects_removed,
                            "Reconciliation pass finished"
                        );
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed-upload reconciliation pass failed");
                    }
                }
            }
        })
    }

    /// One reconciliation pass. Storage deletes are best-effort; a delete
    /// failure never blocks the record purge.
    pub async fn run(&self) -> Result<ReconcileOutcome, AppError> {
        let failed = self.media_files.find_failed().await?;
        if failed.is_empty() {
            return Ok(ReconcileOutcome::default());
        }

        let mut objects_removed = 0u64;
        if let Some(storage) = self.storage.as_ref() {
            for record in &failed {
                match storage.delete_object(&record.key).await {
                    Ok(()) => objects_removed += 1,
                    Err(e) => {
                        tracing::warn!(
                            media_file_id = %record.id,
                            key = %record.key,
                            error = %e,
                            "Failed to delete stored object for failed upload"
                        );
                    }
                }
            }
        }

        let records_purged = self.media_files.delete_failed().await?;

        Ok(ReconcileOutcome {
            records_purged,
            objects_removed,
        })
    }
}
