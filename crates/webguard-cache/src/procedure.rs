//! Atomic procedures.
//!
//! A procedure is a named multi-key read-modify-write sequence that the store
//! executes indivisibly. Each procedure carries two renditions of the same
//! logic: a Lua script run server-side on Redis (`EVALSHA`, loaded on first
//! use), and a Rust body run against the in-process store while its
//! exclusive gate is held.

use std::sync::LazyLock;

use redis::{FromRedisValue, Script};

use crate::CacheResult;
use crate::local::LocalTxn;

/// A named batch of cache operations executed atomically by the store.
pub trait AtomicProcedure: Send + Sync {
    /// Value produced by the procedure.
    type Output: FromRedisValue + Send;

    /// Stable name used in logs and metrics.
    const NAME: &'static str;

    /// Lua rendition executed by Redis.
    fn script(&self) -> &'static Script;

    /// Keys touched by the procedure (`KEYS` in Lua).
    fn keys(&self) -> Vec<String>;

    /// Arguments (`ARGV` in Lua), passed as binary-safe strings.
    fn args(&self) -> Vec<Vec<u8>>;

    /// In-process rendition, executed inside an exclusive transaction.
    fn run_local(&self, txn: &mut LocalTxn<'_>) -> CacheResult<Self::Output>;
}

static RELEASE_LOCK_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
",
    )
});

/// Compare-and-delete of a lock key owned by `token`.
#[derive(Debug, Clone)]
pub(crate) struct ReleaseLock {
    pub key: String,
    pub token: String,
}

impl AtomicProcedure for ReleaseLock {
    type Output = bool;

    const NAME: &'static str = "release_lock";

    fn script(&self) -> &'static Script {
        &RELEASE_LOCK_SCRIPT
    }

    fn keys(&self) -> Vec<String> {
        vec![self.key.clone()]
    }

    fn args(&self) -> Vec<Vec<u8>> {
        vec![self.token.as_bytes().to_vec()]
    }

    fn run_local(&self, txn: &mut LocalTxn<'_>) -> CacheResult<bool> {
        if txn.get(&self.key)?.as_deref() == Some(self.token.as_bytes()) {
            Ok(txn.delete(&self.key))
        } else {
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SetOptions;
    use crate::local::LocalStore;

    #[test]
    fn test_release_lock_requires_owner() {
        let store = LocalStore::new();
        store.set("lock:a", b"owner-1", SetOptions::default());

        let foreign = ReleaseLock {
            key: "lock:a".to_string(),
            token: "owner-2".to_string(),
        };
        assert!(!foreign.run_local(&mut store.transaction()).unwrap());

        let owner = ReleaseLock {
            key: "lock:a".to_string(),
            token: "owner-1".to_string(),
        };
        assert!(owner.run_local(&mut store.transaction()).unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn test_release_lock_script_shape() {
        let procedure = ReleaseLock {
            key: "lock:a".to_string(),
            token: "t".to_string(),
        };
        assert_eq!(procedure.keys(), vec!["lock:a"]);
        assert_eq!(procedure.args(), vec![b"t".to_vec()]);
        assert!(!procedure.script().get_hash().is_empty());
    }
}
