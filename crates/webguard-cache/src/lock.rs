//! Cooperative cache-based lock.

use std::time::Duration;

use uuid::Uuid;

use crate::CacheResult;
use crate::backend::{CacheBackend, SetOptions, run_local};
use crate::error::CacheError;
use crate::procedure::ReleaseLock;

/// Namespace for lock keys.
pub const LOCK_PREFIX: &str = "lock:";

const RETRY_INTERVAL: Duration = Duration::from_millis(5);

/// A held lock, owned by a random token. Only the holder can release it and
/// the key expires on its own if the holder disappears.
///
/// Prefer [`CacheLock::release`]. Dropping an unreleased guard releases it in
/// the background.
#[must_use = "the lock is released when the guard is dropped"]
pub struct CacheLock {
    backend: CacheBackend,
    key: String,
    token: String,
    released: bool,
}

impl CacheLock {
    pub(crate) async fn acquire(
        backend: CacheBackend,
        name: &str,
        timeout: Duration,
    ) -> CacheResult<Self> {
        let key = format!("{LOCK_PREFIX}{name}");
        let token = Uuid::new_v4().simple().to_string();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let options = SetOptions::ttl(timeout).only_if_absent();
            if backend.set(&key, token.as_bytes(), options).await? {
                tracing::debug!(key = %key, "lock acquired");
                return Ok(Self {
                    backend,
                    key,
                    token,
                    released: false,
                });
            }

            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(
                    key = %key,
                    timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    "lock acquisition timed out"
                );
                return Err(CacheError::lock_timeout(name));
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }

    /// Full key of the lock in the store.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Release the lock. Returns `false` if it had already expired and
    /// possibly been taken by someone else.
    pub async fn release(mut self) -> CacheResult<bool> {
        self.released = true;
        let procedure = self.release_procedure();
        let released = self.backend.run_procedure(&procedure).await?;
        if !released {
            tracing::warn!(key = %self.key, "lock expired before release");
        }
        Ok(released)
    }

    fn release_procedure(&self) -> ReleaseLock {
        ReleaseLock {
            key: self.key.clone(),
            token: self.token.clone(),
        }
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let procedure = self.release_procedure();
        match &self.backend {
            CacheBackend::Local(store) => {
                if let Err(err) = run_local(store, &procedure) {
                    tracing::warn!(key = %self.key, error = %err, "failed to release lock");
                }
            }
            CacheBackend::Redis(_) => {
                let Ok(handle) = tokio::runtime::Handle::try_current() else {
                    // Outside a runtime the key simply expires.
                    return;
                };
                let backend = self.backend.clone();
                handle.spawn(async move {
                    if let Err(err) = backend.run_procedure(&procedure).await {
                        tracing::warn!(key = %procedure.key, error = %err, "failed to release lock");
                    }
                });
            }
        }
    }
}
