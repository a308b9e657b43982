use async_trait::async_trait;
use cached::{Cached, SizedCache};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::config::CacheBackendKind;

pub const KEY_PREFIX: &str = "cat_";
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Raw key/value store holding JSON strings.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error>;
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>)
        -> Result<(), anyhow::Error>;
    async fn delete(&self, key: &str) -> Result<(), anyhow::Error>;
}

#[derive(Clone)]
struct CacheEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|e| Instant::now() >= e)
    }
}

/// Process-local store holding at most `capacity` keys. The least recently
/// used key is evicted first.
pub struct MemoryCache {
    entries: Mutex<SizedCache<String, CacheEntry>>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(SizedCache::with_size(capacity.max(1))),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.cache_size()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let key = key.to_string();
        let mut entries = self.entries.lock().await;
        let expired = match entries.cache_get(&key) {
            Some(entry) if !entry.is_expired() => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.cache_remove(&key);
        }
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<(), anyhow::Error> {
        let mut entries = self.entries.lock().await;
        entries.cache_set(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), anyhow::Error> {
        self.entries.lock().await.cache_remove(&key.to_string());
        Ok(())
    }
}

/// Always misses.
pub struct NoCache;

#[async_trait]
impl CacheBackend for NoCache {
    async fn get(&self, _key: &str) -> Result<Option<String>, anyhow::Error> {
        Ok(None)
    }

    async fn set(&self, _: &str, _: String, _: Option<Duration>) -> Result<(), anyhow::Error> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<(), anyhow::Error> {
        Ok(())
    }
}

pub fn backend_from_kind(kind: CacheBackendKind, capacity: usize) -> Arc<dyn CacheBackend> {
    match kind {
        CacheBackendKind::Memory => Arc::new(MemoryCache::with_capacity(capacity)),
        CacheBackendKind::None => Arc::new(NoCache),
    }
}

/// Typed, best-effort view over a [`CacheBackend`].
///
/// Backend failures and undecodable values never reach the caller: a failed
/// read is a miss, a failed write or delete is a no-op. Each one is logged.
#[derive(Clone)]
pub struct SafeCache {
    backend: Arc<dyn CacheBackend>,
    prefix: &'static str,
}

impl SafeCache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            prefix: KEY_PREFIX,
        }
    }

    fn key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.backend.get(&self.key(key)).await {
            Ok(raw) => raw?,
            Err(err) => {
                log::warn!("Cache read failed for key={key}: {err}");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(v) => Some(v),
            Err(err) => {
                log::warn!("Cache read failed for key={key}: {err}");
                None
            }
        }
    }

    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(err) => {
                log::warn!("Cache write failed for key={key}: {err}");
                return;
            }
        };
        if let Err(err) = self.backend.set(&self.key(key), raw, ttl).await {
            log::warn!("Cache write failed for key={key}: {err}");
        }
    }

    pub async fn delete(&self, key: &str) {
        if let Err(err) = self.backend.delete(&self.key(key)).await {
            log::warn!("Cache delete failed for key={key}: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    struct BrokenBackend;

    #[async_trait]
    impl CacheBackend for BrokenBackend {
        async fn get(&self, _key: &str) -> Result<Option<String>, anyhow::Error> {
            Err(anyhow!("connection refused"))
        }
        async fn set(&self, _: &str, _: String, _: Option<Duration>) -> Result<(), anyhow::Error> {
            Err(anyhow!("connection refused"))
        }
        async fn delete(&self, _key: &str) -> Result<(), anyhow::Error> {
            Err(anyhow!("connection refused"))
        }
    }

    #[actix_web::test]
    async fn broken_backend_degrades_to_miss() {
        let cache = SafeCache::new(Arc::new(BrokenBackend));
        cache.set("lot_1", &5, None).await;
        assert_eq!(cache.get::<i32>("lot_1").await, None);
        cache.delete("lot_1").await;
    }

    #[actix_web::test]
    async fn memory_cache_round_trip_and_delete() {
        let cache = SafeCache::new(Arc::new(MemoryCache::new()));
        cache.set("catalog_3", &vec![1, 2, 3], None).await;
        assert_eq!(cache.get::<Vec<i32>>("catalog_3").await, Some(vec![1, 2, 3]));
        cache.delete("catalog_3").await;
        assert_eq!(cache.get::<Vec<i32>>("catalog_3").await, None);
    }

    #[actix_web::test]
    async fn expired_entries_miss() {
        let backend = MemoryCache::new();
        backend
            .set("k", "1".to_string(), Some(Duration::ZERO))
            .await
            .expect("memory set");
        assert_eq!(backend.get("k").await.expect("memory get"), None);
    }

    #[actix_web::test]
    async fn full_cache_evicts_least_recently_used() {
        let backend = MemoryCache::with_capacity(2);
        backend.set("a", "1".to_string(), None).await.expect("memory set");
        backend.set("b", "2".to_string(), None).await.expect("memory set");
        assert_eq!(backend.get("a").await.expect("memory get").as_deref(), Some("1"));
        backend.set("c", "3".to_string(), None).await.expect("memory set");

        assert_eq!(backend.len().await, 2);
        assert_eq!(backend.get("b").await.expect("memory get"), None);
        assert_eq!(backend.get("a").await.expect("memory get").as_deref(), Some("1"));
        assert_eq!(backend.get("c").await.expect("memory get").as_deref(), Some("3"));
    }

    #[actix_web::test]
    async fn many_writes_stay_within_capacity() {
        let backend = MemoryCache::with_capacity(100);
        for i in 0..1000 {
            backend
                .set(&format!("lot_{i}"), i.to_string(), None)
                .await
                .expect("memory set");
            backend
                .set(&format!("gone_{i}"), i.to_string(), Some(Duration::ZERO))
                .await
                .expect("memory set");
        }
        assert_eq!(backend.len().await, 100);
    }

    #[actix_web::test]
    async fn expired_entry_is_dropped_on_read() {
        let backend = MemoryCache::new();
        backend
            .set("k", "1".to_string(), Some(Duration::ZERO))
            .await
            .expect("memory set");
        assert_eq!(backend.len().await, 1);
        assert_eq!(backend.get("k").await.expect("memory get"), None);
        assert!(backend.is_empty().await);
    }

    #[actix_web::test]
    async fn undecodable_value_is_a_miss() {
        let backend = Arc::new(MemoryCache::new());
        backend
            .set("cat_lot_9", "not json".to_string(), None)
            .await
            .expect("memory set");
        let cache = SafeCache::new(backend);
        assert_eq!(cache.get::<i32>("lot_9").await, None);
    }

    #[actix_web::test]
    async fn no_cache_never_hits() {
        let cache = SafeCache::new(backend_from_kind(CacheBackendKind::None, DEFAULT_CAPACITY));
        cache.set("sellers_all", &1, None).await;
        assert_eq!(cache.get::<i32>("sellers_all").await, None);
    }
}
