//! In-process cache backend.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use tokio::time::Instant;
use tracing::debug;

use super::backend::{CacheBackend, CacheBackendError};
use super::config::CacheConfig;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::memory";

struct Entry {
    value: Bytes,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Bounded LRU map with per-entry expiry.
///
/// Expired entries are dropped lazily when read or swept. The clock is
/// tokio's, so paused-time tests control expiry.
pub struct MemoryBackend {
    entries: RwLock<LruCache<String, Entry>>,
}

impl MemoryBackend {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(config.memory_capacity_non_zero())),
        }
    }

    /// Number of stored entries, expired ones included until they are touched.
    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live keys in most-recently-used order.
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        rw_read(&self.entries, SOURCE, "keys")
            .iter()
            .filter(|(_, entry)| entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheBackendError> {
        let now = Instant::now();
        let mut entries = rw_write(&self.entries, SOURCE, "get");
        let expired = match entries.get(key) {
            Some(entry) if entry.is_live(now) => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
            debug!(target_module = SOURCE, key, "Dropped expired cache entry");
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), CacheBackendError> {
        let entry = Entry {
            value,
            expires_at: Instant::now() + ttl,
        };
        let evicted = rw_write(&self.entries, SOURCE, "set").push(key.to_string(), entry);
        if let Some((evicted_key, _)) = evicted.filter(|(evicted_key, _)| evicted_key != key) {
            debug!(
                target_module = SOURCE,
                key = %evicted_key,
                "Evicted least recently used cache entry"
            );
        }
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<usize, CacheBackendError> {
        let mut entries = rw_write(&self.entries, SOURCE, "delete");
        Ok(keys
            .iter()
            .filter(|key| entries.pop(key.as_str()).is_some())
            .count())
    }

    async fn keys_containing(&self, keyword: &str) -> Result<Vec<String>, CacheBackendError> {
        let now = Instant::now();
        let mut entries = rw_write(&self.entries, SOURCE, "keys_containing");

        let mut matched = Vec::new();
        let mut expired = Vec::new();
        for (key, entry) in entries.iter() {
            if !entry.is_live(now) {
                expired.push(key.clone());
            } else if key.contains(keyword) {
                matched.push(key.clone());
            }
        }
        for key in expired {
            entries.pop(&key);
        }
        Ok(matched)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(capacity: usize) -> MemoryBackend {
        MemoryBackend::new(&CacheConfig {
            memory_capacity: capacity,
            ..CacheConfig::default()
        })
    }

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn set_then_get() {
        let cache = backend(8);
        cache
            .set("genres", Bytes::from_static(b"[]"), TTL)
            .await
            .expect("set");
        let value = cache.get("genres").await.expect("get");
        assert_eq!(value.as_deref(), Some(&b"[]"[..]));
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire() {
        let cache = backend(8);
        cache
            .set("genres", Bytes::from_static(b"[]"), TTL)
            .await
            .expect("set");

        tokio::time::advance(TTL).await;

        assert!(cache.get("genres").await.expect("get").is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn least_recently_used_entry_is_evicted() {
        let cache = backend(2);
        for key in ["a", "b"] {
            cache.set(key, Bytes::new(), TTL).await.expect("set");
        }
        cache.get("a").await.expect("touch a");
        cache.set("c", Bytes::new(), TTL).await.expect("set c");

        let mut keys = cache.keys();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "c".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_skips_and_prunes_expired_keys() {
        let cache = backend(8);
        cache
            .set("movies_1", Bytes::new(), Duration::from_secs(1))
            .await
            .expect("set");
        cache.set("movies_2", Bytes::new(), TTL).await.expect("set");

        tokio::time::advance(Duration::from_secs(2)).await;

        let matched = cache.keys_containing("movie").await.expect("sweep");
        assert_eq!(matched, vec!["movies_2".to_string()]);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn delete_counts_existing_keys() {
        let cache = backend(8);
        cache.set("a", Bytes::new(), TTL).await.expect("set");
        let removed = cache
            .delete(&["a".to_string(), "missing".to_string()])
            .await
            .expect("delete");
        assert_eq!(removed, 1);
    }
}
