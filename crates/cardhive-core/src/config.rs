//! Configuration module
//!
//! Environment-driven configuration for the media pipeline: database,
//! object storage, upload tuning, progress cache, job queue, and the
//! failed-upload reconciler.

use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};

/// Minimum multipart part size accepted by S3-compatible stores (5 MiB).
pub const MIN_PART_SIZE_BYTES: usize = 5 * 1024 * 1024;

/// Application configuration for the media pipeline.
#[derive(Clone, Debug)]
pub struct Config {
    pub server_port: u16,
    pub environment: String,
    // Database
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    // Object storage
    pub s3_bucket: String,
    pub s3_region: String,
    pub s3_endpoint: Option<String>,
    pub s3_force_path_style: bool,
    // Upload tuning
    pub max_upload_size_bytes: usize,
    pub part_size_bytes: usize,
    pub max_concurrent_parts: usize,
    pub staging_dir: PathBuf,
    // Progress cache
    pub redis_url: Option<String>,
    pub cache_ttl_secs: u64,
    // Upload job queue
    pub queue_max_workers: usize,
    pub queue_poll_interval_ms: u64,
    pub queue_max_attempts: i32,
    pub queue_backoff_base_ms: u64,
    pub queue_failed_retention_secs: i64,
    pub queue_stale_reap_interval_secs: u64,
    pub queue_stale_grace_secs: i64,
    // Failed-upload reconciler
    pub reconcile_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let max_upload_size_mb = env_parse("MAX_UPLOAD_SIZE_MB", 100usize)?;

        let config = Config {
            server_port: env_parse("PORT", 3003u16)?,
            environment: env::var("ENVIRONMENT")
                .or_else(|_| env::var("APP_ENV"))
                .unwrap_or_else(|_| "development".to_string()),
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", 20u32)?,
            db_timeout_seconds: env_parse("DB_TIMEOUT_SECONDS", 30u64)?,
            s3_bucket: env::var("S3_BUCKET").context("S3_BUCKET must be set")?,
            s3_region: env::var("S3_REGION")
                .or_else(|_| env::var("AWS_REGION"))
                .context("S3_REGION or AWS_REGION must be set")?,
            s3_endpoint: env::var("S3_ENDPOINT").ok().filter(|v| !v.is_empty()),
            s3_force_path_style: env_parse("S3_FORCE_PATH_STYLE", false)?,
            max_upload_size_bytes: max_upload_size_mb * 1024 * 1024,
            part_size_bytes: env_parse("UPLOAD_PART_SIZE_BYTES", MIN_PART_SIZE_BYTES)?,
            max_concurrent_parts: env_parse("UPLOAD_MAX_CONCURRENT_PARTS", 3usize)?,
            staging_dir: env::var("MEDIA_STAGING_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| env::temp_dir().join("cardhive-media-staging")),
            redis_url: env::var("REDIS_URL").ok().filter(|v| !v.is_empty()),
            cache_ttl_secs: env_parse("CACHE_TTL_SECS", 3600u64)?,
            queue_max_workers: env_parse("QUEUE_MAX_WORKERS", 1usize)?,
            queue_poll_interval_ms: env_parse("QUEUE_POLL_INTERVAL_MS", 1000u64)?,
            queue_max_attempts: env_parse("QUEUE_MAX_ATTEMPTS", 3i32)?,
            queue_backoff_base_ms: env_parse("QUEUE_BACKOFF_BASE_MS", 1000u64)?,
            queue_failed_retention_secs: env_parse("QUEUE_FAILED_RETENTION_SECS", 3600i64)?,
            queue_stale_reap_interval_secs: env_parse("QUEUE_STALE_REAP_INTERVAL_SECS", 60u64)?,
            queue_stale_grace_secs: env_parse("QUEUE_STALE_GRACE_SECS", 300i64)?,
            reconcile_interval_secs: env_parse("RECONCILE_INTERVAL_SECS", 86400u64)?,
        };

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.part_size_bytes < MIN_PART_SIZE_BYTES {
            return Err(anyhow!(
                "UPLOAD_PART_SIZE_BYTES must be at least {} bytes, got {}",
                MIN_PART_SIZE_BYTES,
                self.part_size_bytes
            ));
        }
        if self.max_concurrent_parts == 0 {
            return Err(anyhow!("UPLOAD_MAX_CONCURRENT_PARTS must be at least 1"));
        }
        if self.queue_max_workers == 0 {
            return Err(anyhow!("QUEUE_MAX_WORKERS must be at least 1"));
        }
        if self.queue_max_attempts < 1 {
            return Err(anyhow!("QUEUE_MAX_ATTEMPTS must be at least 1"));
        }
        if self.max_upload_size_bytes == 0 {
            return Err(anyhow!("MAX_UPLOAD_SIZE_MB must be at least 1"));
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        let env = self.environment.to_lowercase();
        env == "production" || env == "prod"
    }
}

/// Parse an environment variable, falling back to `default` when unset.
/// Unparseable values are an error rather than a silent fallback.
fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow!("invalid value for {}: {}", name, e)),
        Err(_) => Ok(default),
    }
}
