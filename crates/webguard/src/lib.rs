//! # webguard
//!
//! Wires the webguard crates together from one [`AppConfig`]: the shared
//! cache, the token service and the throttle gate, with a
//! [`BearerTokenAuthenticator`] so that callers holding an access token are
//! rate limited as users and everyone else as anonymous sessions.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use webguard::{Webguard, config::loader::load_config, observability};
//! use webguard_throttle::{RuleDeclaration, RuleRegistry};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config(None)?;
//! observability::init_tracing_with_level(&config.logging.level);
//!
//! let mut rules = RuleRegistry::new();
//! rules.declare("login", RuleDeclaration::new(5, Duration::from_secs(60)))?;
//!
//! let guard = Webguard::build(&config, rules).await?;
//! # let _ = guard;
//! # Ok(())
//! # }
//! ```

pub mod bearer;
pub mod config;
pub mod error;
pub mod observability;

use std::sync::Arc;

use webguard_auth::{TokenService, build_token_service};
use webguard_cache::{CacheBackend, create_cache_backend};
use webguard_throttle::{RuleRegistry, SessionCookieBackend, SlidingWindowLimiter, ThrottleGate};

pub use bearer::BearerTokenAuthenticator;
pub use config::AppConfig;
pub use error::SetupError;

/// The assembled services, sharing one cache.
#[derive(Clone)]
pub struct Webguard {
    pub cache: CacheBackend,
    pub tokens: Arc<dyn TokenService>,
    pub gate: Arc<ThrottleGate>,
}

impl std::fmt::Debug for Webguard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Webguard")
            .field("cache", &self.cache.mode())
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

impl Webguard {
    /// Build every service described by `config` around `rules`.
    ///
    /// # Errors
    /// Fails on invalid configuration, unusable key material, or an
    /// unreachable Redis when Redis is enabled.
    pub async fn build(config: &AppConfig, rules: RuleRegistry) -> Result<Self, SetupError> {
        config.validate().map_err(SetupError::Config)?;

        let cache = create_cache_backend(&config.redis).await?;
        Self::with_cache(config, rules, cache)
    }

    /// Like [`Webguard::build`] but over an existing cache.
    ///
    /// # Errors
    /// Fails on unusable key material or token settings.
    pub fn with_cache(
        config: &AppConfig,
        rules: RuleRegistry,
        cache: CacheBackend,
    ) -> Result<Self, SetupError> {
        let key = config.signing.key_material()?;
        let tokens = build_token_service(cache.clone(), &key, config.token.clone())?;

        let gate = ThrottleGate::new(
            Arc::new(rules),
            Arc::new(SlidingWindowLimiter::new(cache.clone())),
            Arc::new(SessionCookieBackend::new(&config.throttle)),
        )
        .with_authenticator(Arc::new(BearerTokenAuthenticator::new(Arc::clone(&tokens))))
        .enabled(config.throttle.enabled);

        tracing::info!(
            cache = cache.mode(),
            operations = gate.registry().len(),
            throttle_enabled = config.throttle.enabled,
            "Webguard services ready"
        );

        Ok(Self {
            cache,
            tokens,
            gate: Arc::new(gate),
        })
    }
}
