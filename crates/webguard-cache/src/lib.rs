//! # webguard-cache
//!
//! Shared atomic cache used by the webguard token services and rate limiter.
//!
//! The contract: `get`, `set` (with TTL or absolute
//! expiry, optionally only-if-absent), `delete`, a cooperative named lock,
//! and atomic procedures that execute a multi-key read-modify-write sequence
//! indivisibly.
//!
//! ## Modules
//!
//! - [`backend`] - [`CacheBackend`], the local/Redis switch
//! - [`local`] - In-process store
//! - [`remote`] - Redis store
//! - [`procedure`] - The [`AtomicProcedure`] trait
//! - [`lock`] - [`CacheLock`]
//! - [`config`] - [`RedisConfig`]

pub mod backend;
pub mod clock;
pub mod config;
pub mod error;
pub mod local;
pub mod lock;
pub mod procedure;
pub mod remote;

use std::time::Duration;

pub use backend::{CacheBackend, Expiry, SetOptions};
pub use clock::{unix_now, unix_now_secs};
pub use config::RedisConfig;
pub use error::CacheError;
pub use local::{LocalStore, LocalTxn};
pub use lock::CacheLock;
pub use procedure::AtomicProcedure;
pub use remote::RedisStore;

/// Type alias for cache results.
pub type CacheResult<T> = Result<T, CacheError>;

/// Build the cache backend described by `config`.
///
/// With Redis disabled this is the in-process store. With Redis enabled the
/// pool is created and a connection is checked out once. Connection
/// failures are returned; there is no fallback to the local store.
pub async fn create_cache_backend(config: &RedisConfig) -> CacheResult<CacheBackend> {
    if !config.enabled {
        tracing::info!("Redis disabled, using local cache only");
        return Ok(CacheBackend::new_local());
    }

    tracing::info!(url = %config.url, "Connecting to Redis");

    let mut redis_config = deadpool_redis::Config::from_url(&config.url);
    let timeout = Duration::from_millis(config.timeout_ms);
    let mut pool_config = deadpool_redis::PoolConfig::new(config.pool_size);
    pool_config.timeouts.wait = Some(timeout);
    pool_config.timeouts.create = Some(timeout);
    pool_config.timeouts.recycle = Some(timeout);
    redis_config.pool = Some(pool_config);

    let pool = redis_config.create_pool(Some(deadpool_redis::Runtime::Tokio1))?;

    // Test connection
    if let Err(err) = pool.get().await {
        tracing::error!(url = %config.url, error = %err, "Failed to connect to Redis");
        return Err(err.into());
    }

    tracing::info!("Connected to Redis");
    Ok(CacheBackend::new_redis(pool))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_redis_builds_local_backend() {
        let backend = create_cache_backend(&RedisConfig::default()).await.unwrap();
        assert_eq!(backend.mode(), "local");
    }
}
