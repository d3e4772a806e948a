use std::sync::Arc;

use cardhive_core::config::{Config, MIN_PART_SIZE_BYTES};

use crate::s3::S3Storage;
use crate::traits::{ObjectStorage, StorageError, StorageResult};

/// Build the object-storage client from application configuration.
pub async fn create_storage(config: &Config) -> StorageResult<Arc<dyn ObjectStorage>> {
    if config.s3_bucket.trim().is_empty() {
        return Err(StorageError::ConfigError(
            "S3 bucket name must not be empty".to_string(),
        ));
    }
    if config.part_size_bytes < MIN_PART_SIZE_BYTES {
        return Err(StorageError::ConfigError(format!(
            "Multipart part size must be at least {} bytes, got {}",
            MIN_PART_SIZE_BYTES, config.part_size_bytes
        )));
    }

    let storage = S3Storage::new(
        config.s3_bucket.clone(),
        config.s3_region.clone(),
        config.s3_endpoint.clone(),
        config.s3_force_path_style,
        config.part_size_bytes,
        config.max_concurrent_parts,
    )
    .await?;

    tracing::info!(
        bucket = %config.s3_bucket,
        region = %config.s3_region,
        endpoint = config.s3_endpoint.as_deref().unwrap_or("aws"),
        part_size_bytes = config.part_size_bytes,
        max_concurrent_parts = config.max_concurrent_parts,
        "Object storage initialized"
    );

    Ok(Arc::new(storage))
}
