//! Throttle configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ThrottleResult;
use crate::error::ThrottleError;

/// Name of the anonymous session cookie.
pub const DEFAULT_SESSION_COOKIE: &str = "th-session";

/// Settings for the request gate and the anonymous session backend.
///
/// # Example (TOML)
///
/// ```toml
/// [throttle]
/// enabled = true
/// session_cookie = "th-session"
/// session_max_age = "30d"
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// When disabled the gate admits every request.
    pub enabled: bool,

    pub session_cookie: String,

    #[serde(with = "humantime_serde")]
    pub session_max_age: Duration,

    /// Mark the session cookie `Secure`.
    pub secure_cookie: bool,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            session_cookie: DEFAULT_SESSION_COOKIE.to_string(),
            session_max_age: Duration::from_secs(30 * 24 * 3600),
            secure_cookie: false,
        }
    }
}

impl ThrottleConfig {
    /// # Errors
    /// Returns a configuration error for an empty or malformed cookie name.
    pub fn validate(&self) -> ThrottleResult<()> {
        let name = &self.session_cookie;
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ThrottleError::configuration(format!(
                "Invalid session cookie name: '{name}'"
            )));
        }
        Ok(())
    }
}
