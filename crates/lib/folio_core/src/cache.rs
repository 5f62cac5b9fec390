//! Key/value cache with per-entry TTL.
//!
//! Backs refresh tokens, OAuth state and admin setup tokens. Values are
//! structured JSON, not raw strings.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Cache failures. Callers treat these as "not valid", never as a crash.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    #[error("cache value could not be decoded: {0}")]
    Decode(String),
}

/// Cache contract consumed by the auth layer.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Insert or overwrite `key`.
    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError>;

    /// Read `key`. Expired entries read as a miss.
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Atomically remove and return `key`. At most one caller sees the value.
    async fn take(&self, key: &str) -> Result<Option<Value>, CacheError>;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: DateTime<Utc>,
}

impl CacheEntry {
    fn is_live(&self) -> bool {
        Utc::now() < self.expires_at
    }
}

/// In-process cache for development, tests and single-instance deployments.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evict expired entries.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live());
        before.saturating_sub(self.entries.len())
    }

    /// Spawn a periodic purge task that stops when `shutdown` is cancelled.
    pub fn spawn_purge_task(
        self: &Arc<Self>,
        every: Duration,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        let purged = cache.purge_expired();
                        if purged > 0 {
                            debug!(purged, "memory cache purge");
                        }
                    }
                }
            }
        })
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| CacheError::Unavailable(format!("ttl out of range: {e}")))?;
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: Utc::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        Ok(self
            .entries
            .get(key)
            .filter(|entry| entry.is_live())
            .map(|entry| entry.value.clone()))
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<Value>, CacheError> {
        Ok(self
            .entries
            .remove(key)
            .map(|(_, entry)| entry)
            .filter(CacheEntry::is_live)
            .map(|entry| entry.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn get_returns_none_for_missing_key() {
        let cache = MemoryCache::new();
        assert!(cache.get("unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_then_get_returns_value() {
        let cache = MemoryCache::new();
        cache
            .set("k1", json!({"user": "alice"}), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            cache.get("k1").await.unwrap(),
            Some(json!({"user": "alice"}))
        );
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let cache = MemoryCache::new();
        cache.set("k1", json!(1), Duration::from_secs(60)).await.unwrap();
        cache.delete("k1").await.unwrap();
        assert!(cache.get("k1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn take_consumes_exactly_once() {
        let cache = MemoryCache::new();
        cache.set("state", json!("s"), Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.take("state").await.unwrap(), Some(json!("s")));
        assert!(cache.take("state").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_entry_reads_as_miss_and_is_purged() {
        let cache = MemoryCache::new();
        cache.set("old", json!(1), Duration::ZERO).await.unwrap();
        cache.set("fresh", json!(2), Duration::from_secs(60)).await.unwrap();
        assert!(cache.get("old").await.unwrap().is_none());
        assert!(cache.take("old").await.unwrap().is_none());
        cache.set("old", json!(1), Duration::ZERO).await.unwrap();
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn purge_task_stops_on_cancel() {
        let cache = Arc::new(MemoryCache::new());
        let shutdown = CancellationToken::new();
        let handle = cache.spawn_purge_task(Duration::from_millis(10), shutdown.clone());
        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.cancel();
        handle.await.unwrap();
    }
}
