use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use webguard_auth::{KeyMaterial, TokenConfig};
use webguard_cache::RedisConfig;
use webguard_throttle::ThrottleConfig;

use crate::error::SetupError;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Shared store. Disabled means the in-process cache.
    #[serde(default)]
    pub redis: RedisConfig,
    /// Token lifetimes, algorithm and family tracking
    #[serde(default)]
    pub token: TokenConfig,
    #[serde(default)]
    pub signing: SigningConfig,
    #[serde(default)]
    pub throttle: ThrottleConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.redis.validate()?;
        self.token.validate().map_err(|e| e.to_string())?;
        self.throttle.validate().map_err(|e| e.to_string())?;
        self.signing.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Where the signing key comes from.
///
/// Exactly one of `secret` (HMAC) or `private_key_path` (PEM or DER file
/// holding an RSA, EC or Ed25519 private key) must be set. Prefer
/// `WEBGUARD__SIGNING__SECRET` over writing the secret into a file.
#[derive(Clone, Serialize, Deserialize, Default)]
pub struct SigningConfig {
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,
}

impl std::fmt::Debug for SigningConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningConfig")
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("private_key_path", &self.private_key_path)
            .finish()
    }
}

impl SigningConfig {
    pub fn validate(&self) -> Result<(), String> {
        match (&self.secret, &self.private_key_path) {
            (Some(_), Some(_)) => {
                Err("signing: set either secret or private_key_path, not both".into())
            }
            (None, None) => Err("signing: secret or private_key_path is required".into()),
            (Some(secret), None) if secret.is_empty() => {
                Err("signing: secret must not be empty".into())
            }
            _ => Ok(()),
        }
    }

    /// Load the configured key material.
    pub fn key_material(&self) -> Result<KeyMaterial, SetupError> {
        if let Some(path) = &self.private_key_path {
            let bytes = std::fs::read(path).map_err(|source| SetupError::Io {
                path: path.clone(),
                source,
            })?;
            return Ok(KeyMaterial::detect(&bytes)?);
        }
        match &self.secret {
            Some(secret) => Ok(KeyMaterial::symmetric(secret.as_bytes().to_vec())?),
            None => Err(SetupError::config(
                "signing: secret or private_key_path is required",
            )),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub const DEFAULT_CONFIG_FILE: &str = "webguard.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        } else if path.is_some() {
            tracing::warn!(path = ?path, "Config file not found, using defaults and environment");
        }
        // Environment variable overrides, e.g., WEBGUARD__REDIS__URL=redis://cache:6379
        builder = builder.add_source(
            Environment::with_prefix("WEBGUARD")
                .prefix_separator("__")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::time::Duration;

    use super::*;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_from_file() {
        let file = write_config(
            r#"
[logging]
level = "debug"

[token]
access_token_lifetime = "15m"
refresh_token_lifetime = "1d"
family_tracking = true

[signing]
secret = "a-secret-that-is-long-enough-for-hs256!!"

[throttle]
session_cookie = "guard"
"#,
        );

        let config = loader::load_config(file.path().to_str()).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(
            config.token.access_token_lifetime,
            Duration::from_secs(15 * 60)
        );
        assert!(config.token.family_tracking);
        assert_eq!(config.throttle.session_cookie, "guard");
        assert!(!config.redis.enabled);
    }

    #[test]
    fn test_invalid_lifetimes_are_rejected() {
        let file = write_config(
            r#"
[token]
access_token_lifetime = "2d"
refresh_token_lifetime = "1d"

[signing]
secret = "a-secret-that-is-long-enough-for-hs256!!"
"#,
        );
        assert!(loader::load_config(file.path().to_str()).is_err());
    }

    #[test]
    fn test_signing_requires_exactly_one_source() {
        assert!(SigningConfig::default().validate().is_err());

        let both = SigningConfig {
            secret: Some("s".into()),
            private_key_path: Some(PathBuf::from("key.pem")),
        };
        assert!(both.validate().is_err());

        let secret = SigningConfig {
            secret: Some("s".repeat(32)),
            private_key_path: None,
        };
        assert!(secret.validate().is_ok());
        assert_eq!(secret.key_material().unwrap().kind(), "secret");
        assert!(!format!("{secret:?}").contains("sss"));
    }

    #[test]
    fn test_missing_key_file() {
        let signing = SigningConfig {
            secret: None,
            private_key_path: Some(PathBuf::from("/nonexistent/webguard.pem")),
        };
        assert!(matches!(
            signing.key_material(),
            Err(SetupError::Io { .. })
        ));
    }
}
