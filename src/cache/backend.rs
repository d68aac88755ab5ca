//! The key-value cache seam.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheBackendError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
    #[error("cache command failed: {0}")]
    Command(String),
}

/// Operations the cache-aside layer needs from a key-value store.
///
/// Implementations hold serialized JSON under string keys. Every call is an
/// independent request; no ordering is promised between concurrent callers.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheBackendError>;

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), CacheBackendError>;

    /// Deletes every listed key. Returns how many existed.
    async fn delete(&self, keys: &[String]) -> Result<usize, CacheBackendError>;

    /// Every live key containing `keyword`. Linear in the total key count.
    async fn keys_containing(&self, keyword: &str) -> Result<Vec<String>, CacheBackendError>;

    fn name(&self) -> &'static str;
}
