//! Cache-aside layer in front of the document store.
//!
//! Reads go through [`CacheAside::get_or_load`]; writes invalidate either the
//! exact keys they touched or, for families of derived keys, every key that
//! contains a keyword. The cache is purely an optimisation: backend failures
//! degrade to a miss on read and are swallowed on invalidation.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! backend = "memory"        # or "redis"
//! redis_url = "redis://127.0.0.1:6379"
//! memory_capacity = 10000
//! list_ttl_secs = 1800
//! detail_ttl_secs = 600
//! ```

mod aside;
mod backend;
mod config;
mod keys;
mod lock;
mod memory;
mod redis;

pub use aside::CacheAside;
pub use backend::{CacheBackend, CacheBackendError};
pub use self::config::{BackendKind, CacheConfig};
pub use keys::{CATEGORIES_WITH_MOVIES, CacheKey, CacheTtl};
pub use memory::MemoryBackend;
pub use self::redis::RedisBackend;
