//! Local staging of inbound uploads
//!
//! Request bodies are spooled to a staging directory before a job is
//! enqueued, so the HTTP request can complete while the transfer to
//! object storage happens in the background. Staged files are removed by
//! the worker after the upload reaches a terminal state.

use std::path::{Path, PathBuf};

use axum::extract::multipart::Field;
use cardhive_core::AppError;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// A fully staged inbound file.
#[derive(Debug)]
pub struct StagedFile {
    pub path: PathBuf,
    pub size: u64,
    pub file_name: String,
    pub content_type: String,
}

impl StagedFile {
    /// Remove the staged bytes. Used on intake failures; after a job is
    /// enqueued, cleanup belongs to the worker.
    pub async fn discard(&self) {
        if let Err(e) = fs::remove_file(&self.path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to discard staged file");
            }
        }
    }
}

/// Stream one multipart field to a unique file under `staging_dir`,
/// rejecting it once it exceeds `max_size_bytes`.
pub async fn stage_field(
    staging_dir: &Path,
    field: &mut Field<'_>,
    max_size_bytes: u64,
) -> Result<StagedFile, AppError> {
    let file_name = field
        .file_name()
        .filter(|name| !name.is_empty())
        .unwrap_or("upload.bin")
        .to_string();
    let content_type = field
        .content_type()
        .unwrap_or("application/octet-stream")
        .to_string();

    fs::create_dir_all(staging_dir).await?;
    let path = staging_dir.join(Uuid::new_v4().to_string());
    let mut file = fs::File::create(&path).await?;

    let mut size: u64 = 0;
    loop {
        let chunk = match field.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => {
                drop(file);
                let _ = fs::remove_file(&path).await;
                return Err(AppError::InvalidInput(format!(
                    "Failed to read upload body: {}",
                    e
                )));
            }
        };

        size += chunk.len() as u64;
        if size > max_size_bytes {
            drop(file);
            let _ = fs::remove_file(&path).await;
            return Err(AppError::PayloadTooLarge(format!(
                "upload exceeds {} bytes",
                max_size_bytes
            )));
        }

        if let Err(e) = file.write_all(&chunk).await {
            drop(file);
            let _ = fs::remove_file(&path).await;
            return Err(e.into());
        }
    }

    if let Err(e) = file.flush().await {
        let _ = fs::remove_file(&path).await;
        return Err(e.into());
    }

    Ok(StagedFile {
        path,
        size,
        file_name,
        content_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn discard_removes_the_staged_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("staged");
        tokio::fs::write(&path, b"bytes").await.unwrap();

        let staged = StagedFile {
            path: path.clone(),
            size: 5,
            file_name: "card.png".to_string(),
            content_type: "image/png".to_string(),
        };
        staged.discard().await;

        assert!(!path.exists());
    }

    #[tokio::test]
    async fn discard_is_silent_when_already_gone() {
        let staged = StagedFile {
            path: PathBuf::from("/tmp/cardhive-staging-test-missing"),
            size: 0,
            file_name: "x".to_string(),
            content_type: "application/octet-stream".to_string(),
        };
        // Must not panic or error.
        staged.discard().await;
    }
}
