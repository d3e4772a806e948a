use crate::traits::{
    ObjectStorage, ProgressFn, StorageError, StorageResult, TransferProgress, UploadOutcome,
};
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::retry::{RetryConfig, RetryMode};
use aws_config::BehaviorVersion;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use bytes::Bytes;
use std::collections::HashMap;
use std::pin::Pin;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinSet;

/// S3 storage implementation
///
/// Uploads are always multipart: parts of `part_size` bytes are read from
/// the stream sequentially and transferred with up to
/// `max_concurrent_parts` in flight. Progress is reported as parts
/// complete. A failed transfer aborts the multipart upload best-effort;
/// any parts the abort misses are reclaimed by the failed-upload
/// reconciler.
#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
    region: String,
    endpoint_url: Option<String>, // Custom endpoint for S3-compatible providers
    part_size: usize,
    max_concurrent_parts: usize,
}

impl S3Storage {
    /// Create a new S3Storage instance
    ///
    /// # Arguments
    /// * `bucket` - S3 bucket name
    /// * `region` - AWS region (or region identifier for S3-compatible providers)
    /// * `endpoint_url` - Optional custom endpoint URL for S3-compatible providers
    ///   (e.g., "http://localhost:9000" for MinIO)
    /// * `force_path_style` - Path-style addressing (required for MinIO and
    ///   most S3-compatible providers; implied when an endpoint is set)
    /// * `part_size` - Multipart part size in bytes (minimum 5 MiB)
    /// * `max_concurrent_parts` - Bound on in-flight part uploads per transfer
    pub async fn new(
        bucket: String,
        region: String,
        endpoint_url: Option<String>,
        force_path_style: bool,
        part_size: usize,
        max_concurrent_parts: usize,
    ) -> StorageResult<Self> {
        let region_provider =
            RegionProviderChain::first_try(aws_config::Region::new(region.clone()));

        let retry_config = RetryConfig::standard()
            .with_max_attempts(3)
            .with_retry_mode(RetryMode::Adaptive);

        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(region_provider)
            .retry_config(retry_config.clone())
            .load()
            .await;

        let path_style = force_path_style || endpoint_url.is_some();
        let client = if endpoint_url.is_some() || path_style {
            let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&config)
                .force_path_style(path_style)
                .retry_config(retry_config);
            if let Some(ref endpoint) = endpoint_url {
                s3_config_builder = s3_config_builder.endpoint_url(endpoint);
            }
            Client::from_conf(s3_config_builder.build())
        } else {
            Client::new(&config)
        };

        Ok(S3Storage {
            client,
            bucket,
            region,
            endpoint_url,
            part_size,
            max_concurrent_parts,
        })
    }

    /// Generate public URL for an S3 object
    ///
    /// For AWS S3, uses the standard format: https://{bucket}.s3.{region}.amazonaws.com/{key}
    /// For S3-compatible providers, uses path-style against the endpoint URL.
    fn generate_url(&self, key: &str) -> String {
        if let Some(ref endpoint) = self.endpoint_url {
            format!("{}/{}/{}", endpoint.trim_end_matches('/'), self.bucket, key)
        } else {
            format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.bucket, self.region, key
            )
        }
    }

    /// Read the stream part by part, keeping up to `max_concurrent_parts`
    /// uploads in flight. Returns the completed parts (ordered) and the
    /// observed stream size.
    async fn stream_parts(
        &self,
        key: &str,
        upload_id: &str,
        mut reader: Pin<Box<dyn AsyncRead + Send + Unpin>>,
        declared_size: Option<u64>,
        progress: Option<&ProgressFn>,
    ) -> StorageResult<(Vec<CompletedPart>, u64)> {
        let mut tasks: JoinSet<StorageResult<(i32, CompletedPart, usize)>> = JoinSet::new();
        let mut completed: Vec<(i32, CompletedPart)> = Vec::new();
        let mut part_number = 1i32;
        let mut total_size = 0u64;
        let mut loaded = 0u64;

        let mut collect =
            |result: Result<StorageResult<(i32, CompletedPart, usize)>, tokio::task::JoinError>,
             completed: &mut Vec<(i32, CompletedPart)>,
             loaded: &mut u64|
             -> StorageResult<()> {
                let (number, part, len) = result
                    .map_err(|e| StorageError::UploadFailed(format!("part task panicked: {}", e)))??;
                completed.push((number, part));
                *loaded += len as u64;
                if let Some(progress) = progress {
                    progress(TransferProgress {
                        loaded_bytes: *loaded,
                        total_bytes: declared_size,
                    });
                }
                Ok(())
            };

        loop {
            let mut part_buffer = vec![0u8; self.part_size];
            let mut bytes_in_part = 0usize;
            while bytes_in_part < self.part_size {
                let bytes_read = reader.read(&mut part_buffer[bytes_in_part..]).await?;
                if bytes_read == 0 {
                    break;
                }
                bytes_in_part += bytes_read;
            }

            if bytes_in_part == 0 {
                break;
            }
            total_size += bytes_in_part as u64;
            part_buffer.truncate(bytes_in_part);

            while tasks.len() >= self.max_concurrent_parts {
                match tasks.join_next().await {
                    Some(result) => collect(result, &mut completed, &mut loaded)?,
                    None => break,
                }
            }

            let client = self.client.clone();
            let bucket = self.bucket.clone();
            let key = key.to_string();
            let upload_id = upload_id.to_string();
            let number = part_number;
            tasks.spawn(async move {
                let part_len = part_buffer.len();
                let output = client
                    .upload_part()
                    .bucket(&bucket)
                    .key(&key)
                    .upload_id(&upload_id)
                    .part_number(number)
                    .body(ByteStream::from(Bytes::from(part_buffer)))
                    .send()
                    .await
                    .map_err(|e| {
                        tracing::error!(
                            error = %e,
                            bucket = %bucket,
                            key = %key,
                            part_number = number,
                            "Failed to upload part"
                        );
                        StorageError::UploadFailed(e.to_string())
                    })?;

                let e_tag = output.e_tag().ok_or_else(|| {
                    StorageError::UploadFailed(format!("No ETag returned for part {}", number))
                })?;

                Ok((
                    number,
                    CompletedPart::builder()
                        .part_number(number)
                        .e_tag(e_tag)
                        .build(),
                    part_len,
                ))
            });

            part_number += 1;

            // A short final part means EOF
            if bytes_in_part < self.part_size {
                break;
            }
        }

        while let Some(result) = tasks.join_next().await {
            collect(result, &mut completed, &mut loaded)?;
        }

        completed.sort_by_key(|(number, _)| *number);
        Ok((
            completed.into_iter().map(|(_, part)| part).collect(),
            total_size,
        ))
    }

    async fn abort_upload(&self, key: &str, upload_id: &str) {
        if let Err(e) = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
        {
            tracing::warn!(
                bucket = %self.bucket,
                key = %key,
                upload_id = %upload_id,
                error = %e,
                "Failed to abort multipart upload, orphaned parts may remain"
            );
        }
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn upload_multipart(
        &self,
        key: &str,
        reader: Pin<Box<dyn AsyncRead + Send + Unpin>>,
        content_type: &str,
        metadata: HashMap<String, String>,
        declared_size: Option<u64>,
        progress: Option<ProgressFn>,
    ) -> StorageResult<UploadOutcome> {
        let start = Instant::now();

        let create_result = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .set_metadata(if metadata.is_empty() {
                None
            } else {
                Some(metadata)
            })
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %key,
                    "Failed to create multipart upload"
                );
                StorageError::UploadFailed(e.to_string())
            })?;

        let upload_id = create_result
            .upload_id()
            .ok_or_else(|| StorageError::UploadFailed("No upload ID returned from S3".to_string()))?
            .to_string();

        let (parts, total_size) = match self
            .stream_parts(key, &upload_id, reader, declared_size, progress.as_ref())
            .await
        {
            Ok(streamed) => streamed,
            Err(e) => {
                self.abort_upload(key, &upload_id).await;
                return Err(e);
            }
        };

        // Zero-byte stream: multipart completion requires at least one part,
        // so fall back to a plain put of the empty object.
        if parts.is_empty() {
            self.abort_upload(key, &upload_id).await;

            let output = self
                .client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .content_type(content_type)
                .body(ByteStream::from(Bytes::new()))
                .send()
                .await
                .map_err(|e| StorageError::UploadFailed(e.to_string()))?;

            return Ok(UploadOutcome {
                e_tag: output.e_tag().map(str::to_string),
                location: Some(self.generate_url(key)),
                size: 0,
            });
        }

        let part_count = parts.len();
        let completed_parts = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();

        let complete_result = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(&upload_id)
            .multipart_upload(completed_parts)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %key,
                    "Failed to complete multipart upload"
                );
                StorageError::UploadFailed(e.to_string())
            })?;

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            size_bytes = total_size,
            parts = part_count,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 multipart upload successful"
        );

        Ok(UploadOutcome {
            e_tag: complete_result.e_tag().map(str::to_string),
            location: complete_result
                .location()
                .map(str::to_string)
                .or_else(|| Some(self.generate_url(key))),
            size: total_size,
        })
    }

    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        let start = Instant::now();

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 delete failed"
                );
                StorageError::DeleteFailed(e.to_string())
            })?;

        tracing::debug!(
            bucket = %self.bucket,
            key = %key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 delete successful"
        );

        Ok(())
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn public_url(&self, key: &str) -> String {
        self.generate_url(key)
    }
}
