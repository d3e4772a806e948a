use cardhive_core::models::ProgressSnapshot;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

const KEY_PREFIX: &str = "cardhive:media:progress";

fn snapshot_key(id: Uuid) -> String {
    format!("{}:{}", KEY_PREFIX, id)
}

/// Redis-backed snapshot store.
///
/// Entries are JSON payloads under `cardhive:media:progress:{id}` with a
/// TTL, so abandoned uploads age out on their own.
#[derive(Clone)]
pub struct RedisProgressCache {
    connection: ConnectionManager,
    ttl_secs: u64,
}

impl RedisProgressCache {
    pub async fn new(redis_url: &str, ttl_secs: u64) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(redis_url)?;
        let connection = client.get_connection_manager().await?;
        Ok(Self {
            connection,
            ttl_secs,
        })
    }

    async fn set(&self, snapshot: &ProgressSnapshot) {
        let payload = match serde_json::to_string(snapshot) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(media_file_id = %snapshot.id, error = %e, "Failed to serialize progress snapshot");
                return;
            }
        };

        let mut conn = self.connection.clone();
        let result: Result<(), redis::RedisError> = conn
            .set_ex(snapshot_key(snapshot.id), payload, self.ttl_secs)
            .await;
        if let Err(e) = result {
            tracing::warn!(media_file_id = %snapshot.id, error = %e, "Failed to cache progress snapshot");
        }
    }

    async fn get(&self, id: Uuid) -> Option<ProgressSnapshot> {
        let mut conn = self.connection.clone();
        let payload: Option<String> = match conn.get(snapshot_key(id)).await {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(media_file_id = %id, error = %e, "Failed to read progress snapshot");
                return None;
            }
        };

        let payload = payload?;
        match serde_json::from_str(&payload) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                // A stale or malformed entry reads as a miss.
                tracing::warn!(media_file_id = %id, error = %e, "Discarding malformed progress snapshot");
                None
            }
        }
    }

    async fn remove(&self, id: Uuid) {
        let mut conn = self.connection.clone();
        let result: Result<(), redis::RedisError> = conn.del(snapshot_key(id)).await;
        if let Err(e) = result {
            tracing::warn!(media_file_id = %id, error = %e, "Failed to evict progress snapshot");
        }
    }
}

/// Progress snapshot cache.
///
/// Redis is optional: without a configured URL the cache degrades to a
/// no-op and every progress read goes to the database. None of the
/// operations can fail from the caller's point of view.
#[derive(Clone)]
pub enum ProgressCache {
    Configured(RedisProgressCache),
    Unconfigured,
}

impl ProgressCache {
    /// Connect to Redis when a URL is configured. A connection failure
    /// logs a warning and degrades to the unconfigured cache rather than
    /// failing startup.
    pub async fn connect(redis_url: Option<&str>, ttl_secs: u64) -> Self {
        let Some(url) = redis_url else {
            tracing::info!("No Redis URL configured, progress reads will hit the database");
            return ProgressCache::Unconfigured;
        };

        match RedisProgressCache::new(url, ttl_secs).await {
            Ok(cache) => {
                tracing::info!(ttl_secs, "Progress cache connected");
                ProgressCache::Configured(cache)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to connect progress cache, continuing without it");
                ProgressCache::Unconfigured
            }
        }
    }

    pub fn is_configured(&self) -> bool {
        matches!(self, ProgressCache::Configured(_))
    }

    /// Store the latest snapshot, best-effort.
    pub async fn set(&self, snapshot: &ProgressSnapshot) {
        if let ProgressCache::Configured(cache) = self {
            cache.set(snapshot).await;
        }
    }

    /// Fetch the latest snapshot, treating every failure as a miss.
    pub async fn get(&self, id: Uuid) -> Option<ProgressSnapshot> {
        match self {
            ProgressCache::Configured(cache) => cache.get(id).await,
            ProgressCache::Unconfigured => None,
        }
    }

    /// Drop the snapshot for a record, best-effort.
    pub async fn remove(&self, id: Uuid) {
        if let ProgressCache::Configured(cache) = self {
            cache.remove(id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cardhive_core::models::MediaFileStatus;
    use chrono::Utc;

    fn snapshot() -> ProgressSnapshot {
        ProgressSnapshot {
            id: Uuid::new_v4(),
            status: MediaFileStatus::Uploading,
            progress: 45,
            bucket: "card-assets".to_string(),
            key: "uploads/abc".to_string(),
            url: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn keys_are_namespaced_by_id() {
        let id = Uuid::nil();
        assert_eq!(
            snapshot_key(id),
            "cardhive:media:progress:00000000-0000-0000-0000-000000000000"
        );
    }

    #[tokio::test]
    async fn unconfigured_cache_is_a_noop() {
        let cache = ProgressCache::Unconfigured;
        let snap = snapshot();

        cache.set(&snap).await;
        assert_eq!(cache.get(snap.id).await, None);
        cache.remove(snap.id).await;
        assert!(!cache.is_configured());
    }

    #[tokio::test]
    async fn missing_url_degrades_to_unconfigured() {
        let cache = ProgressCache::connect(None, 3600).await;
        assert!(!cache.is_configured());
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let snap = snapshot();
        let payload = serde_json::to_string(&snap).unwrap();
        let parsed: ProgressSnapshot = serde_json::from_str(&payload).unwrap();
        assert_eq!(parsed, snap);
    }
}
