//! Redis cache backend.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::AsyncCommands;
use redis::aio::{ConnectionLike, ConnectionManager};
use tracing::info;

use super::backend::{CacheBackend, CacheBackendError};

/// Cache backend over a shared Redis connection, by default the
/// auto-reconnecting [`ConnectionManager`].
#[derive(Clone)]
pub struct RedisBackend<C = ConnectionManager> {
    conn: C,
}

impl RedisBackend {
    /// Connects eagerly so a bad URL or unreachable server fails at startup.
    pub async fn connect(url: &str) -> Result<Self, CacheBackendError> {
        let client = redis::Client::open(url).map_err(map_redis_error)?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(map_redis_error)?;
        info!(target_module = "cache::redis", "Connected to redis cache");
        Ok(Self { conn: manager })
    }
}

impl<C> RedisBackend<C> {
    pub fn with_connection(conn: C) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl<C> CacheBackend for RedisBackend<C>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheBackendError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key).await.map_err(map_redis_error)?;
        Ok(value.map(Bytes::from))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), CacheBackendError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, &value[..], ttl.as_secs().max(1))
            .await
            .map_err(map_redis_error)
    }

    async fn delete(&self, keys: &[String]) -> Result<usize, CacheBackendError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        conn.del(keys).await.map_err(map_redis_error)
    }

    async fn keys_containing(&self, keyword: &str) -> Result<Vec<String>, CacheBackendError> {
        let mut conn = self.conn.clone();
        conn.keys(contains_pattern(keyword))
            .await
            .map_err(map_redis_error)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// `KEYS` glob matching any key that contains `keyword` literally.
fn contains_pattern(keyword: &str) -> String {
    let mut pattern = String::with_capacity(keyword.len() + 2);
    pattern.push('*');
    for ch in keyword.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('*');
    pattern
}

fn map_redis_error(err: redis::RedisError) -> CacheBackendError {
    if err.is_io_error()
        || err.is_connection_refusal()
        || err.is_connection_dropped()
        || err.is_timeout()
    {
        CacheBackendError::Unavailable(err.to_string())
    } else {
        CacheBackendError::Command(err.to_string())
    }
}
