//! Cache error types.

/// Errors that can occur while talking to the cache store.
///
/// Never swallowed here: an unreachable store is always reported to the
/// caller.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The Redis server rejected a command or the connection broke.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// No connection could be obtained from the pool.
    #[error("Connection pool error: {message}")]
    Pool {
        /// Description of the pool failure.
        message: String,
    },

    /// A stored value could not be encoded or decoded.
    #[error("Codec error: {message}")]
    Codec {
        /// Description of the codec failure.
        message: String,
    },

    /// The lock could not be acquired before its timeout elapsed.
    #[error("Timed out acquiring lock '{key}'")]
    LockTimeout {
        /// Name of the contended lock.
        key: String,
    },

    /// The key holds a value of a different kind than the operation expects.
    #[error("Key '{key}' holds a value of the wrong type")]
    WrongType {
        /// The offending key.
        key: String,
    },
}

impl CacheError {
    /// Creates a new `Pool` error.
    #[must_use]
    pub fn pool(message: impl Into<String>) -> Self {
        Self::Pool {
            message: message.into(),
        }
    }

    /// Creates a new `Codec` error.
    #[must_use]
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates a new `LockTimeout` error.
    #[must_use]
    pub fn lock_timeout(key: impl Into<String>) -> Self {
        Self::LockTimeout { key: key.into() }
    }

    /// Creates a new `WrongType` error.
    #[must_use]
    pub fn wrong_type(key: impl Into<String>) -> Self {
        Self::WrongType { key: key.into() }
    }

    /// Returns `true` if the store itself could not be reached.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::Pool { .. } => true,
            Self::Redis(err) => err.is_io_error() || err.is_connection_dropped(),
            _ => false,
        }
    }
}

impl From<deadpool_redis::PoolError> for CacheError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        Self::pool(err.to_string())
    }
}

impl From<deadpool_redis::CreatePoolError> for CacheError {
    fn from(err: deadpool_redis::CreatePoolError) -> Self {
        Self::pool(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CacheError::lock_timeout("jwt_abc");
        assert_eq!(err.to_string(), "Timed out acquiring lock 'jwt_abc'");

        let err = CacheError::wrong_type("window");
        assert_eq!(err.to_string(), "Key 'window' holds a value of the wrong type");
    }

    #[test]
    fn test_is_unavailable() {
        assert!(CacheError::pool("refused").is_unavailable());
        assert!(!CacheError::codec("bad msgpack").is_unavailable());
        assert!(!CacheError::wrong_type("k").is_unavailable());
    }
}
