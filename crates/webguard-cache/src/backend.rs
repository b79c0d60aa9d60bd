//! Cache backend selection: in-process store or Redis.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use deadpool_redis::Pool;

use crate::CacheResult;
use crate::local::LocalStore;
use crate::lock::CacheLock;
use crate::procedure::AtomicProcedure;
use crate::remote::RedisStore;

/// When a written value stops being visible.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Expiry {
    /// Relative time-to-live.
    Ttl(Duration),
    /// Absolute unix timestamp in seconds.
    At(i64),
}

impl Expiry {
    /// Absolute deadline in fractional unix seconds.
    pub(crate) fn deadline(self, now: f64) -> f64 {
        match self {
            Self::Ttl(ttl) => now + ttl.as_secs_f64(),
            Self::At(at) => at as f64,
        }
    }
}

/// Options for [`CacheBackend::set`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SetOptions {
    pub expiry: Option<Expiry>,
    pub only_if_absent: bool,
}

impl SetOptions {
    /// Expire after `ttl`.
    #[must_use]
    pub fn ttl(ttl: Duration) -> Self {
        Self {
            expiry: Some(Expiry::Ttl(ttl)),
            only_if_absent: false,
        }
    }

    /// Expire at the given unix second.
    #[must_use]
    pub fn expire_at(unix_secs: i64) -> Self {
        Self {
            expiry: Some(Expiry::At(unix_secs)),
            only_if_absent: false,
        }
    }

    /// Only write when no live value exists (`NX`).
    #[must_use]
    pub fn only_if_absent(mut self) -> Self {
        self.only_if_absent = true;
        self
    }
}

/// Cache backend shared by the token services and the rate limiter.
///
/// ## Cache Modes
///
/// - **Local**: Single-instance mode, a DashMap store inside this process
/// - **Redis**: Multi-instance mode, every instance talks to the same Redis
///
/// Both modes implement the same contract: get, set, delete, named locks
/// and atomic procedures.
#[derive(Clone)]
pub enum CacheBackend {
    /// Single-instance: in-process store
    Local(Arc<LocalStore>),

    /// Multi-instance: Redis
    Redis(RedisStore),
}

impl fmt::Debug for CacheBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheBackend")
            .field("mode", &self.mode())
            .finish()
    }
}

impl CacheBackend {
    /// Create a new local-only cache backend.
    pub fn new_local() -> Self {
        CacheBackend::Local(Arc::new(LocalStore::new()))
    }

    /// Create a new Redis-backed cache backend.
    pub fn new_redis(redis_pool: Pool) -> Self {
        CacheBackend::Redis(RedisStore::new(redis_pool))
    }

    /// Mode name for logs and metrics.
    pub fn mode(&self) -> &'static str {
        match self {
            CacheBackend::Local(_) => "local",
            CacheBackend::Redis(_) => "redis",
        }
    }

    pub async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        match self {
            CacheBackend::Local(store) => store.get(key),
            CacheBackend::Redis(store) => store.get(key).await,
        }
    }

    /// Write a value. Returns `false` when `only_if_absent` was requested and
    /// the key already held a live value.
    pub async fn set(&self, key: &str, value: &[u8], options: SetOptions) -> CacheResult<bool> {
        match self {
            CacheBackend::Local(store) => Ok(store.set(key, value, options)),
            CacheBackend::Redis(store) => store.set(key, value, options).await,
        }
    }

    /// Remove a key. Returns `true` if a live value was removed.
    pub async fn delete(&self, key: &str) -> CacheResult<bool> {
        match self {
            CacheBackend::Local(store) => Ok(store.delete(key)),
            CacheBackend::Redis(store) => store.delete(key).await,
        }
    }

    /// Acquire the cooperative lock `name`.
    ///
    /// The lock expires on its own after `timeout`, and acquisition gives up
    /// with [`CacheError::LockTimeout`](crate::CacheError::LockTimeout) once
    /// `timeout` has elapsed.
    pub async fn lock(&self, name: &str, timeout: Duration) -> CacheResult<CacheLock> {
        CacheLock::acquire(self.clone(), name, timeout).await
    }

    /// Execute an atomic procedure.
    pub async fn run_procedure<P: AtomicProcedure>(&self, procedure: &P) -> CacheResult<P::Output> {
        metrics::counter!(
            "webguard_cache_procedures_total",
            "procedure" => P::NAME,
            "mode" => self.mode()
        )
        .increment(1);

        let result = match self {
            CacheBackend::Local(store) => run_local(store, procedure),
            CacheBackend::Redis(store) => store.run(procedure).await,
        };

        if let Err(err) = &result {
            tracing::warn!(procedure = P::NAME, error = %err, "atomic procedure failed");
        }
        result
    }
}

/// Run a procedure against the local store with the exclusive gate held.
pub(crate) fn run_local<P: AtomicProcedure>(
    store: &LocalStore,
    procedure: &P,
) -> CacheResult<P::Output> {
    let mut txn = store.transaction();
    procedure.run_local(&mut txn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_options_builders() {
        let options = SetOptions::ttl(Duration::from_secs(5)).only_if_absent();
        assert_eq!(options.expiry, Some(Expiry::Ttl(Duration::from_secs(5))));
        assert!(options.only_if_absent);

        let options = SetOptions::expire_at(1_700_000_000);
        assert_eq!(options.expiry, Some(Expiry::At(1_700_000_000)));
        assert!(!options.only_if_absent);
    }

    #[test]
    fn test_expiry_deadline() {
        assert_eq!(Expiry::Ttl(Duration::from_millis(1500)).deadline(100.0), 101.5);
        assert_eq!(Expiry::At(42).deadline(100.0), 42.0);
    }

    #[tokio::test]
    async fn test_local_backend_contract() {
        let cache = CacheBackend::new_local();
        assert_eq!(cache.mode(), "local");

        assert!(cache.set("k", b"v", SetOptions::default()).await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert!(!cache
            .set("k", b"w", SetOptions::default().only_if_absent())
            .await
            .unwrap());
        assert!(cache.delete("k").await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), None);
    }
}
