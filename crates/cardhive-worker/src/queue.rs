//! Upload queue: worker pool, LISTEN/NOTIFY or polling, retry, and submission.
//!
//! Shutdown: [`UploadQueue::shutdown`] signals the pool to stop; it does not
//! wait for in-flight jobs. For graceful shutdown, coordinate with your
//! runtime and allow time for running jobs to finish before process exit.

use anyhow::Result;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::sleep;

use cardhive_core::models::{UploadJob, UploadJobPayload};
use cardhive_db::{UploadJobRepository, JOB_NOTIFY_CHANNEL};

use crate::context::UploadJobHandler;

/// Maximum delay in milliseconds before retrying a failed job. Caps
/// exponential backoff so that high attempt counts do not produce
/// excessively long delays.
pub const MAX_RETRY_BACKOFF_MS: u64 = 300_000;

/// Computes backoff in milliseconds for a given attempt count
/// (exponential with cap). `attempts` counts attempts already started,
/// so the first retry after attempt 1 waits one base interval.
#[inline]
pub(crate) fn compute_retry_backoff_ms(attempts: i32, base_ms: u64) -> u64 {
    let exponent = attempts.saturating_sub(1).max(0) as u32;
    base_ms
        .saturating_mul(2_u64.saturating_pow(exponent))
        .min(MAX_RETRY_BACKOFF_MS)
}

#[derive(Clone)]
pub struct UploadQueueConfig {
    pub max_workers: usize,
    pub poll_interval_ms: u64,
    pub max_attempts: i32,
    pub backoff_base_ms: u64,
    /// How long failed jobs stay visible before the sweep removes them.
    pub failed_retention_secs: i64,
    /// Interval in seconds between runs of the queue maintenance sweep.
    pub maintenance_interval_secs: u64,
    /// Grace period in seconds before a RUNNING job is considered stale.
    pub stale_grace_secs: i64,
}

impl Default for UploadQueueConfig {
    fn default() -> Self {
        Self {
            max_workers: 1,
            poll_interval_ms: 1000,
            max_attempts: 3,
            backoff_base_ms: 1000,
            failed_retention_secs: 3600,
            maintenance_interval_secs: 60,
            stale_grace_secs: 300,
        }
    }
}

pub struct UploadQueue {
    repository: UploadJobRepository,
    config: UploadQueueConfig,
    shutdown_tx: mpsc::Sender<()>,
}

impl UploadQueue {
    /// Create a new UploadQueue with a weak reference to the job handler.
    ///
    /// If `pool` is `Some`, the worker uses PostgreSQL LISTEN/NOTIFY to wake
    /// immediately when jobs are enqueued, in addition to polling at
    /// `poll_interval_ms`. If `pool` is `None`, only polling is used.
    pub fn new(
        repository: UploadJobRepository,
        config: UploadQueueConfig,
        handler: Weak<dyn UploadJobHandler>,
        pool: Option<sqlx::PgPool>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let repo_clone = repository.clone();
        let config_clone = config.clone();

        tokio::spawn(async move {
            Self::worker_pool(repo_clone, config_clone, handler, shutdown_rx, pool).await;
        });

        Self {
            repository,
            config,
            shutdown_tx,
        }
    }

    /// Submit a new upload job to the queue.
    #[tracing::instrument(skip(self, payload), fields(media_file_id = %payload.media_file_id))]
    pub async fn submit(&self, payload: &UploadJobPayload) -> Result<UploadJob> {
        let job = self
            .repository
            .enqueue(payload, self.config.max_attempts)
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    media_file_id = %payload.media_file_id,
                    "Failed to enqueue upload job"
                );
                anyhow::anyhow!("Failed to enqueue upload job: {}", e)
            })?;

        tracing::info!(
            job_id = %job.id,
            file_name = %job.file_name,
            size_bytes = job.size,
            "Upload job submitted to queue"
        );

        Ok(job)
    }

    async fn worker_pool(
        repository: UploadJobRepository,
        config: UploadQueueConfig,
        handler: Weak<dyn UploadJobHandler>,
        mut shutdown_rx: mpsc::Receiver<()>,
        pool: Option<sqlx::PgPool>,
    ) {
        let use_listen = pool.is_some();
        tracing::info!(
            max_workers = config.max_workers,
            poll_interval_ms = config.poll_interval_ms,
            listen_notify = use_listen,
            "Upload queue worker pool started"
        );

        let semaphore = Arc::new(Semaphore::new(config.max_workers));
        let poll_interval = Duration::from_millis(config.poll_interval_ms);

        // Channel to wake the main loop when LISTEN receives a NOTIFY
        // (avoids blocking on recv when no pool).
        let (notify_tx, mut notify_rx) = mpsc::channel::<()>(16);
        if let Some(pool) = pool {
            let tx = notify_tx.clone();
            tokio::spawn(async move {
                loop {
                    match sqlx::postgres::PgListener::connect_with(&pool).await {
                        Ok(mut listener) => {
                            if let Err(e) = listener.listen(JOB_NOTIFY_CHANNEL).await {
                                tracing::warn!(error = %e, "LISTEN failed, will retry");
                                tokio::time::sleep(Duration::from_secs(5)).await;
                                continue;
                            }
                            while listener.recv().await.is_ok() {
                                let _ = tx.send(()).await;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "PgListener connect failed, will retry");
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                    }
                }
            });
        }

        // Spawn the maintenance sweep: recover stale RUNNING jobs and purge
        // failed jobs past retention (if interval > 0).
        let (sweep_shutdown_tx, mut sweep_shutdown_rx) = mpsc::channel::<()>(1);
        if config.maintenance_interval_secs > 0 {
            let repo_for_sweep = repository.clone();
            let sweep_interval = Duration::from_secs(config.maintenance_interval_secs);
            let grace_secs = config.stale_grace_secs;
            let retention_secs = config.failed_retention_secs;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(sweep_interval);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            match repo_for_sweep.reap_stale_running(grace_secs).await {
                                Ok(outcome) if outcome.rescheduled > 0 || outcome.failed > 0 => {
                                    tracing::warn!(
                                        rescheduled = outcome.rescheduled,
                                        failed = outcome.failed,
                                        "Recovered stale running jobs"
                                    );
                                }
                                Ok(_) => {}
                                Err(e) => tracing::error!(error = %e, "Stale job sweep failed"),
                            }
                            match repo_for_sweep.purge_expired_failed(retention_secs).await {
                                Ok(purged) if purged > 0 => {
                                    tracing::info!(purged, "Purged failed jobs past retention");
                                }
                                Ok(_) => {}
                                Err(e) => tracing::error!(error = %e, "Failed job purge failed"),
                            }
                        }
                        _ = sweep_shutdown_rx.recv() => break,
                    }
                }
            });
        }

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Upload queue worker pool shutting down");
                    let _ = sweep_shutdown_tx.send(()).await;
                    break;
                }
                _ = notify_rx.recv() => {
                    Self::claim_and_dispatch_one(&repository, &config, &semaphore, &handler).await;
                }
                _ = sleep(poll_interval) => {
                    Self::claim_and_dispatch_one(&repository, &config, &semaphore, &handler).await;
                }
            }
        }

        tracing::info!("Upload queue worker pool stopped");
    }

    async fn claim_and_dispatch_one(
        repository: &UploadJobRepository,
        config: &UploadQueueConfig,
        semaphore: &Arc<Semaphore>,
        handler: &Weak<dyn UploadJobHandler>,
    ) {
        let permit = match semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::debug!("No workers available, skipping claim");
                return;
            }
        };

        match repository.claim_next().await {
            Ok(Some(job)) => {
                let repo = repository.clone();
                let backoff_base_ms = config.backoff_base_ms;
                let handler = handler.clone();

                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) =
                        Self::process_job_with_retry(job, repo, backoff_base_ms, handler).await
                    {
                        tracing::error!(error = %e, "Upload job failed permanently");
                    }
                });
            }
            Ok(None) => {
                drop(permit);
                tracing::trace!("No upload jobs available in queue");
            }
            Err(e) => {
                drop(permit);
                tracing::error!(error = %e, "Failed to claim upload job from queue");
            }
        }
    }

    #[tracing::instrument(
        skip(job, repository, handler),
        fields(job.id = %job.id, media_file_id = %job.media_file_id, attempt = job.attempts)
    )]
    async fn process_job_with_retry(
        job: UploadJob,
        repository: UploadJobRepository,
        backoff_base_ms: u64,
        handler: Weak<dyn UploadJobHandler>,
    ) -> Result<()> {
        let handler = handler
            .upgrade()
            .ok_or_else(|| anyhow::anyhow!("UploadJobHandler was dropped, cannot process job"))?;

        let final_attempt = job.is_final_attempt();

        match handler.handle(&job, final_attempt).await {
            Ok(()) => {
                repository.delete(job.id).await?;
                tracing::info!(job_id = %job.id, "Upload job completed, removed from queue");
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    job_id = %job.id,
                    error = %e,
                    attempts = job.attempts,
                    max_attempts = job.max_attempts,
                    recoverable = e.is_recoverable(),
                    "Upload job execution failed"
                );

                if e.is_recoverable() && job.can_retry() {
                    let backoff_ms = compute_retry_backoff_ms(job.attempts, backoff_base_ms);
                    tracing::info!(
                        job_id = %job.id,
                        next_attempt = job.attempts + 1,
                        backoff_ms,
                        "Scheduling upload job retry"
                    );
                    repository
                        .schedule_retry(job.id, backoff_ms, &e.to_string())
                        .await?;
                    Ok(())
                } else {
                    repository.mark_failed(job.id, &e.to_string()).await?;
                    tracing::error!(job_id = %job.id, "Upload job failed, will not retry");
                    Err(e.into_inner())
                }
            }
        }
    }

    /// Signals the worker pool to stop claiming new jobs and exit the main
    /// loop. Returns immediately; in-flight jobs keep running until they
    /// finish.
    pub async fn shutdown(&self) {
        tracing::info!("Initiating upload queue shutdown");
        let _ = self.shutdown_tx.send(()).await;
    }
}

impl Clone for UploadQueue {
    fn clone(&self) -> Self {
        Self {
            repository: self.repository.clone(),
            config: self.config.clone(),
            shutdown_tx: self.shutdown_tx.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_backoff_doubles_per_attempt() {
        assert_eq!(compute_retry_backoff_ms(1, 1000), 1000);
        assert_eq!(compute_retry_backoff_ms(2, 1000), 2000);
        assert_eq!(compute_retry_backoff_ms(3, 1000), 4000);
    }

    #[test]
    fn retry_backoff_is_capped() {
        assert_eq!(compute_retry_backoff_ms(30, 1000), MAX_RETRY_BACKOFF_MS);
        assert_eq!(compute_retry_backoff_ms(i32::MAX, 1000), MAX_RETRY_BACKOFF_MS);
    }

    #[test]
    fn retry_backoff_tolerates_zero_attempts() {
        assert_eq!(compute_retry_backoff_ms(0, 1000), 1000);
    }
}
