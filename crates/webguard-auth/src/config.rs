//! Token service configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::token::SigningAlgorithm;

/// Token lifetimes and service behavior.
///
/// # Example (TOML)
///
/// ```toml
/// [token]
/// access_token_lifetime = "15m"
/// refresh_token_lifetime = "7d"
/// family_tracking = true
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Access token lifetime.
    #[serde(with = "humantime_serde")]
    pub access_token_lifetime: Duration,

    /// Refresh token lifetime. Also the lifetime of the refresh record and of
    /// the family index entry.
    #[serde(with = "humantime_serde")]
    pub refresh_token_lifetime: Duration,

    /// Algorithm the key is expected to derive. Startup fails on mismatch.
    pub algorithm: Option<SigningAlgorithm>,

    /// How long a record or rotation lock is waited for, and held at most.
    #[serde(with = "humantime_serde")]
    pub lock_timeout: Duration,

    /// Index refresh tokens per subject.
    pub family_tracking: bool,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            access_token_lifetime: Duration::from_secs(3600), // 1 hour
            refresh_token_lifetime: Duration::from_secs(7 * 24 * 3600), // 7 days
            algorithm: None,
            lock_timeout: Duration::from_secs(1),
            family_tracking: false,
        }
    }
}

impl TokenConfig {
    #[must_use]
    pub fn with_lifetimes(mut self, access: Duration, refresh: Duration) -> Self {
        self.access_token_lifetime = access;
        self.refresh_token_lifetime = refresh;
        self
    }

    #[must_use]
    pub fn with_algorithm(mut self, algorithm: SigningAlgorithm) -> Self {
        self.algorithm = Some(algorithm);
        self
    }

    #[must_use]
    pub fn with_family_tracking(mut self, enabled: bool) -> Self {
        self.family_tracking = enabled;
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a lifetime or the lock timeout
    /// is zero, or if access tokens would outlive refresh tokens.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.access_token_lifetime.as_secs() == 0 {
            return Err(ConfigError::InvalidValue(
                "access_token_lifetime must be at least one second".to_string(),
            ));
        }

        if self.refresh_token_lifetime.as_secs() == 0 {
            return Err(ConfigError::InvalidValue(
                "refresh_token_lifetime must be at least one second".to_string(),
            ));
        }

        if self.access_token_lifetime > self.refresh_token_lifetime {
            return Err(ConfigError::InvalidValue(
                "access_token_lifetime cannot exceed refresh_token_lifetime".to_string(),
            ));
        }

        if self.lock_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "lock_timeout must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}
