//! Redis-backed cache store.

use deadpool_redis::{Connection, Pool};
use redis::AsyncCommands;

use crate::CacheResult;
use crate::backend::{Expiry, SetOptions};
use crate::procedure::AtomicProcedure;

/// Cache store shared by every instance through a Redis server.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
}

impl RedisStore {
    /// Wrap an existing connection pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Access the underlying pool.
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    async fn connection(&self) -> CacheResult<Connection> {
        Ok(self.pool.get().await?)
    }

    pub async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut conn = self.connection().await?;
        let value: Option<Vec<u8>> = conn.get(key).await?;
        tracing::debug!(key = %key, hit = value.is_some(), "redis GET");
        Ok(value)
    }

    pub async fn set(&self, key: &str, value: &[u8], options: SetOptions) -> CacheResult<bool> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        match options.expiry {
            Some(Expiry::Ttl(ttl)) => {
                // PX rejects zero.
                let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
                cmd.arg("PX").arg(millis);
            }
            Some(Expiry::At(at)) => {
                cmd.arg("EXAT").arg(at.max(1));
            }
            None => {}
        }
        if options.only_if_absent {
            cmd.arg("NX");
        }

        let mut conn = self.connection().await?;
        let reply: Option<String> = cmd.query_async(&mut conn).await?;
        tracing::debug!(key = %key, written = reply.is_some(), "redis SET");
        Ok(reply.is_some())
    }

    pub async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.connection().await?;
        let removed: i64 = conn.del(key).await?;
        tracing::debug!(key = %key, removed, "redis DEL");
        Ok(removed > 0)
    }

    /// Run a procedure's Lua script. The script is sent by hash and loaded
    /// on a `NOSCRIPT` miss.
    pub async fn run<P: AtomicProcedure>(&self, procedure: &P) -> CacheResult<P::Output> {
        let mut invocation = procedure.script().prepare_invoke();
        for key in procedure.keys() {
            invocation.key(key);
        }
        for arg in procedure.args() {
            invocation.arg(arg);
        }

        let mut conn = self.connection().await?;
        let output: P::Output = invocation.invoke_async(&mut conn).await?;
        Ok(output)
    }
}
