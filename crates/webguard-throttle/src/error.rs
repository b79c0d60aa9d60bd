//! Throttle error types.

use webguard_cache::CacheError;

/// Errors raised while declaring rules or gating a request.
#[derive(Debug, thiserror::Error)]
pub enum ThrottleError {
    /// The window counters could not be read or updated.
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// A rule declaration or setting is unusable.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The authentication collaborator failed (not: rejected the caller).
    #[error("Authentication error: {message}")]
    Authentication { message: String },
}

impl ThrottleError {
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Returns `true` if the shared cache could not be reached.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Cache(err) if err.is_unavailable())
    }
}
