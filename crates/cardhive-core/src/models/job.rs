use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Queue state of an upload job.
///
/// Successful jobs are deleted from the queue immediately, so there is no
/// `COMPLETED` state. `FAILED` jobs (retries exhausted) are retained for a
/// configurable window for inspection, then purged by the queue's sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "upload_job_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum UploadJobStatus {
    Pending,
    Scheduled,
    Running,
    Failed,
}

/// Inputs needed to perform one background upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadJobPayload {
    pub media_file_id: Uuid,
    /// Ephemeral local staging path holding the inbound bytes.
    pub file_path: String,
    pub file_name: String,
    pub content_type: String,
    pub size: i64,
}

/// A durable upload job row.
///
/// `attempts` counts attempts started, including the current one once the
/// job has been claimed.
#[derive(Debug, Clone, FromRow)]
pub struct UploadJob {
    pub id: Uuid,
    pub media_file_id: Uuid,
    pub file_path: String,
    pub file_name: String,
    pub content_type: String,
    pub size: i64,
    pub status: UploadJobStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub run_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub failed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UploadJob {
    /// Whether another attempt remains after the current one fails.
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Whether the current attempt is the last one the policy allows.
    pub fn is_final_attempt(&self) -> bool {
        !self.can_retry()
    }

    pub fn payload(&self) -> UploadJobPayload {
        UploadJobPayload {
            media_file_id: self.media_file_id,
            file_path: self.file_path.clone(),
            file_name: self.file_name.clone(),
            content_type: self.content_type.clone(),
            size: self.size,
        }
    }
}
