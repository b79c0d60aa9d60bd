//! # webguard-auth
//!
//! Rotating access/refresh token pairs with cache-backed revocation.
//!
//! A refresh token is single-use: rotating it deletes its server-side
//! record, denylists the access token minted alongside it, and mints a fresh
//! pair. Replaying a consumed refresh token yields nothing. With family
//! tracking enabled, every live refresh token of a subject is indexed so
//! that sessions can be listed and revoked individually.
//!
//! ## Modules
//!
//! - [`config`] - Token lifetimes and service settings
//! - [`token`] - Key material, codec, and the token services

pub mod config;
pub mod error;
pub mod token;

use std::sync::Arc;

use webguard_cache::CacheBackend;

pub use config::{ConfigError, TokenConfig};
pub use error::{AuthError, ErrorCategory};
pub use token::{
    CacheTokenService, FamilyTokenService, KeyMaterial, Payload, SigningAlgorithm, TokenClaims,
    TokenCodec, TokenPair, TokenService,
};

/// Type alias for token service results.
pub type AuthResult<T> = Result<T, AuthError>;

/// Build the token service selected by `config.family_tracking`.
///
/// # Errors
/// Returns a configuration error when the settings or the key are unusable.
pub fn build_token_service(
    cache: CacheBackend,
    key: &KeyMaterial,
    config: TokenConfig,
) -> AuthResult<Arc<dyn TokenService>> {
    let family_tracking = config.family_tracking;
    let service = CacheTokenService::new(cache, key, config)?;

    tracing::info!(
        algorithm = %service.algorithm(),
        family_tracking,
        "Token service initialized"
    );

    if family_tracking {
        Ok(Arc::new(FamilyTokenService::from_service(service)))
    } else {
        Ok(Arc::new(service))
    }
}
