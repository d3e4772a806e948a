use cardhive_core::models::{UploadJob, UploadJobPayload, UploadJobStatus};
use cardhive_core::AppError;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

/// Channel name for PostgreSQL LISTEN/NOTIFY when a new upload job is
/// enqueued. Workers wake on it instead of waiting for the next poll.
pub const JOB_NOTIFY_CHANNEL: &str = "cardhive_new_upload_job";

/// Result of one stale-job sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapOutcome {
    /// Jobs put back on the queue for another attempt.
    pub rescheduled: u64,
    /// Jobs that had exhausted their attempts and were marked failed.
    pub failed: u64,
}

/// Durable upload job queue backed by the `upload_jobs` table.
///
/// Claiming uses `FOR UPDATE SKIP LOCKED` so concurrent workers never
/// pick the same job. A job disappears from the table on success; failed
/// jobs stay in `FAILED` state until the retention sweep removes them.
#[derive(Clone)]
pub struct UploadJobRepository {
    pool: PgPool,
}

impl UploadJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Enqueue a new job and notify listening workers.
    pub async fn enqueue(
        &self,
        payload: &UploadJobPayload,
        max_attempts: i32,
    ) -> Result<UploadJob, AppError> {
        let job = sqlx::query_as::<Postgres, UploadJob>(
            r#"
            INSERT INTO upload_jobs (media_file_id, file_path, file_name, content_type, size, status, max_attempts)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(payload.media_file_id)
        .bind(&payload.file_path)
        .bind(&payload.file_name)
        .bind(&payload.content_type)
        .bind(payload.size)
        .bind(UploadJobStatus::Pending)
        .bind(max_attempts)
        .fetch_one(&self.pool)
        .await?;

        // Best-effort wake; a missed notify is covered by the poll interval.
        if let Err(e) = sqlx::query("SELECT pg_notify($1, $2)")
            .bind(JOB_NOTIFY_CHANNEL)
            .bind(job.id.to_string())
            .execute(&self.pool)
            .await
        {
            tracing::warn!(job_id = %job.id, error = %e, "Failed to notify workers of new job");
        }

        Ok(job)
    }

    /// Claim the next runnable job, if any.
    ///
    /// Atomically moves the job to `RUNNING` and increments `attempts`, so
    /// the returned job already counts the attempt that is about to run.
    pub async fn claim_next(&self) -> Result<Option<UploadJob>, AppError> {
        let job = sqlx::query_as::<Postgres, UploadJob>(
            r#"
            UPDATE upload_jobs
            SET status = $1, attempts = attempts + 1, updated_at = now()
            WHERE id = (
                SELECT id FROM upload_jobs
                WHERE status IN ($2, $3) AND run_at <= now()
                ORDER BY run_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(UploadJobStatus::Running)
        .bind(UploadJobStatus::Pending)
        .bind(UploadJobStatus::Scheduled)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    /// Put a job back on the queue to run after `backoff_ms`.
    pub async fn schedule_retry(
        &self,
        id: Uuid,
        backoff_ms: u64,
        error: &str,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE upload_jobs
            SET status = $2,
                run_at = now() + ($3 * interval '1 millisecond'),
                last_error = $4,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(UploadJobStatus::Scheduled)
        .bind(backoff_ms as i64)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Terminal failure: the job stays visible as `FAILED` until the
    /// retention sweep removes it.
    pub async fn mark_failed(&self, id: Uuid, error: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE upload_jobs
            SET status = $2, last_error = $3, failed_at = now(), updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(UploadJobStatus::Failed)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Remove a job after a successful run.
    pub async fn delete(&self, id: Uuid) -> Result<(), AppError> {
        sqlx::query("DELETE FROM upload_jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Delete `FAILED` jobs older than the retention window.
    pub async fn purge_expired_failed(&self, retention_secs: i64) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            DELETE FROM upload_jobs
            WHERE status = $1 AND failed_at < now() - ($2 * interval '1 second')
            "#,
        )
        .bind(UploadJobStatus::Failed)
        .bind(retention_secs)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Recover jobs stuck in `RUNNING` past the grace period, typically
    /// after a worker crash. Jobs with attempts left go back on the queue;
    /// the rest are marked failed.
    pub async fn reap_stale_running(&self, grace_secs: i64) -> Result<ReapOutcome, AppError> {
        let rescheduled = sqlx::query(
            r#"
            UPDATE upload_jobs
            SET status = $2, run_at = now(), last_error = 'worker timed out', updated_at = now()
            WHERE status = $1
              AND updated_at < now() - ($3 * interval '1 second')
              AND attempts < max_attempts
            "#,
        )
        .bind(UploadJobStatus::Running)
        .bind(UploadJobStatus::Scheduled)
        .bind(grace_secs)
        .execute(&self.pool)
        .await?
        .rows_affected();

        let failed = sqlx::query(
            r#"
            UPDATE upload_jobs
            SET status = $2, last_error = 'worker timed out', failed_at = now(), updated_at = now()
            WHERE status = $1
              AND updated_at < now() - ($3 * interval '1 second')
              AND attempts >= max_attempts
            "#,
        )
        .bind(UploadJobStatus::Running)
        .bind(UploadJobStatus::Failed)
        .bind(grace_secs)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(ReapOutcome {
            rescheduled,
            failed,
        })
    }
}
