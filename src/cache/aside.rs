use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use super::backend::CacheBackend;
use super::config::CacheConfig;
use super::keys::{CacheKey, CacheTtl};

const SOURCE: &str = "cache::aside";

const METRIC_HIT: &str = "marquee_cache_hit_total";
const METRIC_MISS: &str = "marquee_cache_miss_total";
const METRIC_BACKEND_ERROR: &str = "marquee_cache_backend_error_total";
const METRIC_INVALIDATED: &str = "marquee_cache_invalidated_keys_total";

/// Cache-aside reads and invalidation over a [`CacheBackend`].
///
/// Nothing here fails because of the cache. Backend errors and undecodable
/// entries turn reads into misses; failed invalidations are logged and
/// dropped, leaving the TTL to bound staleness.
#[derive(Clone)]
pub struct CacheAside {
    backend: Arc<dyn CacheBackend>,
    config: CacheConfig,
}

impl CacheAside {
    pub fn new(backend: Arc<dyn CacheBackend>, config: CacheConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn ttl(&self, class: CacheTtl) -> Duration {
        self.config.ttl(class)
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Returns the cached value for `key`, or runs `loader` and caches its
    /// result for `ttl`.
    ///
    /// Loader errors are returned unchanged and nothing is cached. Concurrent
    /// misses on one key each run their loader.
    pub async fn get_or_load<T, E, F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Duration,
        loader: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let backend = self.backend.name();
        match self.backend.get(key.as_str()).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<T>(&bytes) {
                Ok(value) => {
                    counter!(METRIC_HIT, "backend" => backend).increment(1);
                    debug!(target_module = SOURCE, key = %key, "Cache hit");
                    return Ok(value);
                }
                Err(err) => {
                    counter!(METRIC_MISS, "reason" => "malformed").increment(1);
                    warn!(
                        target_module = SOURCE,
                        key = %key,
                        error = %err,
                        "Cached value could not be decoded; reloading"
                    );
                }
            },
            Ok(None) => {
                counter!(METRIC_MISS, "reason" => "absent").increment(1);
                debug!(target_module = SOURCE, key = %key, "Cache miss");
            }
            Err(err) => {
                counter!(METRIC_MISS, "reason" => "backend_error").increment(1);
                counter!(METRIC_BACKEND_ERROR, "op" => "get").increment(1);
                warn!(
                    target_module = SOURCE,
                    key = %key,
                    backend,
                    error = %err,
                    "Cache read failed; treating as miss"
                );
            }
        }

        let value = loader().await?;
        self.store(key, &value, ttl).await;
        Ok(value)
    }

    async fn store<T: Serialize>(&self, key: &CacheKey, value: &T, ttl: Duration) {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => Bytes::from(bytes),
            Err(err) => {
                warn!(
                    target_module = SOURCE,
                    key = %key,
                    error = %err,
                    "Loaded value could not be serialized; not caching"
                );
                return;
            }
        };

        if let Err(err) = self.backend.set(key.as_str(), bytes, ttl).await {
            counter!(METRIC_BACKEND_ERROR, "op" => "set").increment(1);
            warn!(
                target_module = SOURCE,
                key = %key,
                backend = self.backend.name(),
                error = %err,
                "Cache write failed; value served uncached"
            );
        }
    }

    /// Deletes exactly `key`.
    pub async fn invalidate(&self, key: &CacheKey) {
        self.invalidate_many(std::slice::from_ref(key)).await;
    }

    pub async fn invalidate_many(&self, keys: &[CacheKey]) {
        if keys.is_empty() {
            return;
        }
        let names: Vec<String> = keys.iter().map(|key| key.as_str().to_string()).collect();
        match self.backend.delete(&names).await {
            Ok(removed) => {
                counter!(METRIC_INVALIDATED, "mode" => "key").increment(removed as u64);
                debug!(
                    target_module = SOURCE,
                    keys = ?names,
                    removed,
                    "Invalidated cache keys"
                );
            }
            Err(err) => {
                counter!(METRIC_BACKEND_ERROR, "op" => "delete").increment(1);
                warn!(
                    target_module = SOURCE,
                    keys = ?names,
                    backend = self.backend.name(),
                    error = %err,
                    "Cache invalidation failed; entries expire by TTL"
                );
            }
        }
    }

    /// Deletes every key containing `keyword`. Returns how many were removed.
    ///
    /// Scans the whole key space, so cost grows with the total number of
    /// cached keys rather than the number of matches.
    pub async fn invalidate_by_keyword(&self, keyword: &str) -> usize {
        let matched = match self.backend.keys_containing(keyword).await {
            Ok(matched) => matched,
            Err(err) => {
                counter!(METRIC_BACKEND_ERROR, "op" => "scan").increment(1);
                warn!(
                    target_module = SOURCE,
                    keyword,
                    backend = self.backend.name(),
                    error = %err,
                    "Cache keyword scan failed; entries expire by TTL"
                );
                return 0;
            }
        };

        if matched.is_empty() {
            debug!(target_module = SOURCE, keyword, "Keyword sweep matched no keys");
            return 0;
        }

        match self.backend.delete(&matched).await {
            Ok(removed) => {
                counter!(METRIC_INVALIDATED, "mode" => "keyword").increment(removed as u64);
                info!(
                    target_module = SOURCE,
                    keyword,
                    matched = matched.len(),
                    removed,
                    "Swept cache keys by keyword"
                );
                removed
            }
            Err(err) => {
                counter!(METRIC_BACKEND_ERROR, "op" => "delete").increment(1);
                warn!(
                    target_module = SOURCE,
                    keyword,
                    matched = matched.len(),
                    backend = self.backend.name(),
                    error = %err,
                    "Cache keyword sweep failed; entries expire by TTL"
                );
                0
            }
        }
    }
}
