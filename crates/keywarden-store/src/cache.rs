//! Read-through cache for hot credential queries, backed by [`moka`].
//!
//! Secret lists and profiles are fetched far more often than they change,
//! so both sit behind a TTL cache keyed by `user:{id}:...`. Values are
//! stored as JSON strings internally so any serializable type can share
//! the same cache infrastructure. Every mutation invalidates the owning
//! user's key prefix, never other users' entries.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use moka::future::Cache;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StoreError, StoreResult};

/// Default entry lifetime, matching how quickly stale reads are tolerated.
pub const DEFAULT_TTL_SECS: u64 = 300;

// ── cache stats ──────────────────────────────────────────────────────

/// Counters tracking cache effectiveness.
#[derive(Debug)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Total cache hits since creation.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Total cache misses since creation.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Total lookups (hits + misses).
    pub fn total(&self) -> u64 {
        self.hits() + self.misses()
    }

    /// Hit rate as a value between 0.0 and 1.0 (returns 0.0 if no lookups).
    pub fn hit_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.hits() as f64 / total as f64
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits={} misses={} total={} rate={:.2}%",
            self.hits(),
            self.misses(),
            self.total(),
            self.hit_rate() * 100.0,
        )
    }
}

// ── cache layer ──────────────────────────────────────────────────────

/// A generic, async-aware cache backed by `moka::future::Cache`.
///
/// `T` must be `Serialize + DeserializeOwned + Clone + Send + Sync`.
pub struct CacheLayer<T> {
    name: &'static str,
    inner: Cache<String, String>,
    stats: Arc<CacheStats>,
    _marker: std::marker::PhantomData<T>,
}

impl<T> Clone for CacheLayer<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            inner: self.inner.clone(),
            stats: Arc::clone(&self.stats),
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T> CacheLayer<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Create a cache layer with the given capacity and entry TTL.
    pub fn new(name: &'static str, max_capacity: u64, ttl_secs: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(Duration::from_secs(ttl_secs))
            // Needed for prefix-based invalidation below.
            .support_invalidation_closures()
            .build();

        debug!(name, max_capacity, ttl_secs, "cache layer created");

        Self {
            name,
            inner,
            stats: Arc::new(CacheStats::new()),
            _marker: std::marker::PhantomData,
        }
    }

    /// Look up a cached value by key. Returns `None` on miss.
    pub async fn get(&self, key: &str) -> Option<T> {
        match self.inner.get(key).await {
            Some(json_str) => match serde_json::from_str::<T>(&json_str) {
                Ok(val) => {
                    self.stats.record_hit();
                    debug!(cache = self.name, key, "cache hit");
                    Some(val)
                }
                Err(err) => {
                    // Corrupted entry — evict and treat as miss.
                    tracing::warn!(
                        cache = self.name,
                        key,
                        %err,
                        "cache entry deserialization failed, evicting"
                    );
                    self.inner.invalidate(key).await;
                    self.stats.record_miss();
                    None
                }
            },
            None => {
                self.stats.record_miss();
                debug!(cache = self.name, key, "cache miss");
                None
            }
        }
    }

    /// Insert a value into the cache.
    pub async fn insert(&self, key: &str, value: &T) -> StoreResult<()> {
        let json_str =
            serde_json::to_string(value).map_err(|e| StoreError::Cache(e.to_string()))?;
        self.inner.insert(key.to_string(), json_str).await;
        debug!(cache = self.name, key, "cache insert");
        Ok(())
    }

    /// Remove a specific entry from the cache.
    pub async fn invalidate(&self, key: &str) {
        self.inner.invalidate(key).await;
        debug!(cache = self.name, key, "cache invalidate");
    }

    /// Remove every entry whose key starts with `prefix`.
    ///
    /// Used after mutations to drop all of one user's entries without
    /// touching anyone else's.
    pub fn invalidate_prefix(&self, prefix: &str) -> StoreResult<()> {
        let prefix = prefix.to_string();
        self.inner
            .invalidate_entries_if(move |key, _| key.starts_with(&prefix))
            .map_err(|e| StoreError::Cache(e.to_string()))?;
        debug!(cache = self.name, "cache invalidate_prefix");
        Ok(())
    }

    /// Remove all entries from the cache.
    pub async fn invalidate_all(&self) {
        self.inner.invalidate_all();
        debug!(cache = self.name, "cache invalidate_all");
    }

    /// Get a reference to the cache statistics.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Get or insert: try the cache, and if missing, call the async loader,
    /// cache the result, and return it.
    pub async fn get_or_insert_with<F, Fut>(&self, key: &str, loader: F) -> StoreResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = StoreResult<T>>,
    {
        if let Some(cached) = self.get(key).await {
            return Ok(cached);
        }

        let value = loader().await?;
        self.insert(key, &value).await?;
        Ok(value)
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestRecord {
        id: u64,
        name: String,
    }

    fn make_cache() -> CacheLayer<TestRecord> {
        CacheLayer::new("test", 100, 60)
    }

    #[tokio::test]
    async fn insert_and_get() {
        let cache = make_cache();
        let record = TestRecord {
            id: 1,
            name: "alice".to_string(),
        };

        cache.insert("user:1:profile", &record).await.unwrap();
        let cached = cache.get("user:1:profile").await;
        assert_eq!(cached, Some(record));
    }

    #[tokio::test]
    async fn miss_returns_none() {
        let cache = make_cache();
        assert_eq!(cache.get("nonexistent").await, None);
    }

    #[tokio::test]
    async fn invalidate_removes_entry() {
        let cache = make_cache();
        let record = TestRecord {
            id: 2,
            name: "bob".to_string(),
        };

        cache.insert("user:2:profile", &record).await.unwrap();
        cache.invalidate("user:2:profile").await;
        assert_eq!(cache.get("user:2:profile").await, None);
    }

    #[tokio::test]
    async fn invalidate_prefix_spares_other_users() {
        let cache = make_cache();
        let mine = TestRecord {
            id: 1,
            name: "mine".to_string(),
        };
        let theirs = TestRecord {
            id: 2,
            name: "theirs".to_string(),
        };

        cache.insert("user:1:secrets", &mine).await.unwrap();
        cache.insert("user:1:profile", &mine).await.unwrap();
        cache.insert("user:12:secrets", &theirs).await.unwrap();

        // "user:1:" must not match "user:12:".
        cache.invalidate_prefix("user:1:").unwrap();
        cache.inner.run_pending_tasks().await;

        assert_eq!(cache.get("user:1:secrets").await, None);
        assert_eq!(cache.get("user:1:profile").await, None);
        assert_eq!(cache.get("user:12:secrets").await, Some(theirs));
    }

    #[tokio::test]
    async fn stats_tracking() {
        let cache = make_cache();
        let record = TestRecord {
            id: 3,
            name: "carol".to_string(),
        };

        cache.insert("user:3:profile", &record).await.unwrap();

        // 1 hit
        let _ = cache.get("user:3:profile").await;
        // 2 misses
        let _ = cache.get("nope1").await;
        let _ = cache.get("nope2").await;

        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().misses(), 2);
        assert_eq!(cache.stats().total(), 3);
        assert!((cache.stats().hit_rate() - (1.0 / 3.0)).abs() < 0.01);
    }

    #[tokio::test]
    async fn get_or_insert_with_caches() {
        let cache = make_cache();

        let val = cache
            .get_or_insert_with("user:4:profile", || async {
                Ok(TestRecord {
                    id: 4,
                    name: "dave".to_string(),
                })
            })
            .await
            .unwrap();
        assert_eq!(val.name, "dave");

        // Second call must come from the cache, not the loader.
        let val2 = cache
            .get_or_insert_with("user:4:profile", || async {
                Ok(TestRecord {
                    id: 999,
                    name: "should not appear".to_string(),
                })
            })
            .await
            .unwrap();
        assert_eq!(val2.name, "dave");
        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().misses(), 1);
    }

    #[test]
    fn stats_display() {
        let stats = CacheStats::new();
        stats.hits.store(50, Ordering::Relaxed);
        stats.misses.store(50, Ordering::Relaxed);
        let display = format!("{stats}");
        assert!(display.contains("hits=50"));
        assert!(display.contains("50.00%"));
    }
}
