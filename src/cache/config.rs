//! Cache configuration.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

use super::keys::CacheTtl;

const DEFAULT_MEMORY_CAPACITY: usize = 10_000;
const DEFAULT_LIST_TTL_SECS: u64 = 30 * 60;
const DEFAULT_ENTITY_TTL_SECS: u64 = 30 * 60;
const DEFAULT_DETAIL_TTL_SECS: u64 = 10 * 60;
const DEFAULT_PAGE_TTL_SECS: u64 = 30 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Memory,
    Redis,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::Redis => "redis",
        }
    }

    /// Whether other processes see the same entries. Only a shared backend
    /// can be purged from outside the serving process.
    pub fn is_shared(self) -> bool {
        matches!(self, BackendKind::Redis)
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub backend: BackendKind,
    /// Required when `backend` is redis.
    pub redis_url: Option<String>,
    /// Maximum entries held by the in-process backend.
    pub memory_capacity: usize,
    pub list_ttl: Duration,
    pub entity_ttl: Duration,
    pub detail_ttl: Duration,
    pub page_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            redis_url: None,
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            list_ttl: Duration::from_secs(DEFAULT_LIST_TTL_SECS),
            entity_ttl: Duration::from_secs(DEFAULT_ENTITY_TTL_SECS),
            detail_ttl: Duration::from_secs(DEFAULT_DETAIL_TTL_SECS),
            page_ttl: Duration::from_secs(DEFAULT_PAGE_TTL_SECS),
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            backend: settings.backend,
            redis_url: settings.redis_url.clone(),
            memory_capacity: settings.memory_capacity.get(),
            list_ttl: settings.list_ttl,
            entity_ttl: settings.entity_ttl,
            detail_ttl: settings.detail_ttl,
            page_ttl: settings.page_ttl,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self, class: CacheTtl) -> Duration {
        match class {
            CacheTtl::List => self.list_ttl,
            CacheTtl::Entity => self.entity_ttl,
            CacheTtl::Detail => self.detail_ttl,
            CacheTtl::Page => self.page_ttl,
        }
    }

    /// Returns the memory capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn memory_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.memory_capacity).unwrap_or(NonZeroUsize::MIN)
    }
}
