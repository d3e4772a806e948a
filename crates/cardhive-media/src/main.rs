use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_subscriber::{
    fmt::format::Format, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

use cardhive_cache::ProgressCache;
use cardhive_core::Config;
use cardhive_db::{MediaFileRepository, UploadJobRepository};
use cardhive_media::{build_router, AppState, FailedUploadReconciler, MediaService};
use cardhive_storage::create_storage;
use cardhive_worker::{UploadJobHandler, UploadQueue, UploadQueueConfig, UploadWorker};

fn init_tracing() {
    let console_fmt = tracing_subscriber::fmt::layer().event_format(
        Format::default()
            .compact()
            .with_target(false)
            .without_time(),
    );
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cardhive=debug,tower_http=debug".into()),
        )
        .with(console_fmt)
        .init();
}

/// Setup database connection pool and run migrations.
async fn setup_database(config: &Config) -> Result<PgPool> {
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(config.db_timeout_seconds))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.database_url)
        .await?;

    tracing::info!(
        max_connections = config.db_max_connections,
        "Database connected successfully"
    );

    let migrations_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../migrations");
    let migrator = sqlx::migrate::Migrator::new(migrations_dir)
        .await
        .context("Failed to load migrations")?;
    migrator
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    Ok(pool)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env()?;
    config.validate()?;

    let pool = setup_database(&config).await?;

    tokio::fs::create_dir_all(&config.staging_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create staging directory {}",
                config.staging_dir.display()
            )
        })?;

    let storage = create_storage(&config)
        .await
        .context("Failed to initialize object storage")?;

    let cache = ProgressCache::connect(config.redis_url.as_deref(), config.cache_ttl_secs).await;

    let media_files = MediaFileRepository::new(pool.clone());
    let jobs = UploadJobRepository::new(pool.clone());

    let upload_worker = Arc::new(UploadWorker::new(
        Arc::new(media_files.clone()),
        Arc::clone(&storage),
        cache.clone(),
    ));
    let handler: Arc<dyn UploadJobHandler> = upload_worker.clone();

    let queue = UploadQueue::new(
        jobs,
        UploadQueueConfig {
            max_workers: config.queue_max_workers,
            poll_interval_ms: config.queue_poll_interval_ms,
            max_attempts: config.queue_max_attempts,
            backoff_base_ms: config.queue_backoff_base_ms,
            failed_retention_secs: config.queue_failed_retention_secs,
            maintenance_interval_secs: config.queue_stale_reap_interval_secs,
            stale_grace_secs: config.queue_stale_grace_secs,
        },
        Arc::downgrade(&handler),
        Some(pool.clone()),
    );

    let media = MediaService::new(
        media_files.clone(),
        queue.clone(),
        cache.clone(),
        config.s3_bucket.clone(),
    );

    let reconciler = Arc::new(FailedUploadReconciler::new(
        media_files,
        Some(Arc::clone(&storage)),
        config.reconcile_interval_secs,
    ));
    let _reconciler_handle = reconciler.start();

    let state = Arc::new(AppState {
        config: config.clone(),
        media,
        upload_worker,
    });
    let router = build_router(state);

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(
        addr = %addr,
        max_upload_mb = config.max_upload_size_bytes / 1024 / 1024,
        staging_dir = %config.staging_dir.display(),
        "Media service ready and accepting connections"
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    queue.shutdown().await;
    tracing::info!("Media service stopped");

    Ok(())
}
