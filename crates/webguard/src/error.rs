//! Startup errors.

use std::path::PathBuf;

use webguard_auth::AuthError;
use webguard_cache::CacheError;
use webguard_throttle::ThrottleError;

/// Anything that prevents the services from being built.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Throttle(#[from] ThrottleError),
}

impl SetupError {
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
