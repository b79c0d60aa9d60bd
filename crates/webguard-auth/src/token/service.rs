//! Token services.
//!
//! [`TokenService`] is the seam the HTTP layer talks to. [`CacheTokenService`]
//! is the baseline: one record per refresh token, locks around record access,
//! and a denylist for access tokens whose refresh token was consumed.
//!
//! ## Cache layout
//!
//! | Key                        | Value                          | Lifetime            |
//! |----------------------------|--------------------------------|---------------------|
//! | `jwt_<refresh jti>`        | MessagePack refresh record     | refresh lifetime    |
//! | `jwt_invalidate_<jti>`     | `1`                            | until access expiry |
//! | `jwt_sub_<sub>` (families) | sorted set of refresh ids      | refresh lifetime    |

use async_trait::async_trait;
use webguard_cache::{CacheBackend, CacheLock, SetOptions, unix_now_secs};

use crate::AuthResult;
use crate::config::TokenConfig;
use crate::error::AuthError;
use crate::token::claims::{Payload, TokenClaims, TokenPair, duration_secs};
use crate::token::codec::TokenCodec;
use crate::token::keys::{KeyMaterial, SigningAlgorithm};
use crate::token::record;

/// Prefix of refresh records.
pub const REFRESH_PREFIX: &str = "jwt_";
/// Prefix of denylisted access token ids.
pub const DENYLIST_PREFIX: &str = "jwt_invalidate_";
/// Prefix of per-subject token families.
pub const FAMILY_PREFIX: &str = "jwt_sub_";

pub(crate) fn refresh_key(jti: &str) -> String {
    format!("{REFRESH_PREFIX}{jti}")
}

pub(crate) fn denylist_key(jti: &str) -> String {
    format!("{DENYLIST_PREFIX}{jti}")
}

pub(crate) fn family_key(sub: &str) -> String {
    format!("{FAMILY_PREFIX}{sub}")
}

/// Release the rotation lock and hand back `rotated` unchanged. A failed
/// release is only logged; the lock key expires on its own.
pub(crate) async fn release_rotation_lock<T>(guard: CacheLock, jti: &str, rotated: T) -> T {
    if let Err(err) = guard.release().await {
        tracing::warn!(jti = %jti, error = %err, "Failed to release rotation lock");
    }
    rotated
}

/// Issues, validates, rotates and revokes access/refresh token pairs.
///
/// Validation fails closed: a token that is malformed, badly signed,
/// expired (when checked), denylisted or without a record yields `None`.
/// `Err` is reserved for bad mint input and an unavailable cache.
#[async_trait]
pub trait TokenService: Send + Sync {
    /// Mint a new pair for `claims` and persist the refresh record.
    async fn create_token(&self, claims: &TokenClaims) -> AuthResult<TokenPair>;

    async fn validate_access_token(
        &self,
        token: &str,
        check_expiry: bool,
    ) -> AuthResult<Option<Payload>>;

    /// Validate a refresh token and merge its stored record into the
    /// returned payload's extras.
    async fn validate_refresh_token(
        &self,
        token: &str,
        check_expiry: bool,
    ) -> AuthResult<Option<Payload>>;

    /// Revoke a refresh token and the access token minted with it.
    ///
    /// Returns `true` only for the call that actually removed the record.
    async fn invalidate_token(&self, refresh_token: &str) -> AuthResult<bool>;

    /// Rotate: consume `refresh_token` and mint a new pair for `claims`.
    ///
    /// Returns `None` if the refresh token is not valid or was consumed by a
    /// concurrent rotation.
    async fn update_token(
        &self,
        claims: &TokenClaims,
        refresh_token: &str,
    ) -> AuthResult<Option<TokenPair>>;
}

/// A pair and the payloads it was signed from.
pub(crate) struct Minted {
    pub access: Payload,
    pub refresh: Payload,
    pub pair: TokenPair,
}

/// Baseline token service over the shared cache.
pub struct CacheTokenService {
    cache: CacheBackend,
    codec: TokenCodec,
    config: TokenConfig,
}

impl std::fmt::Debug for CacheTokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheTokenService")
            .field("cache", &self.cache)
            .field("algorithm", &self.codec.algorithm())
            .field("config", &self.config)
            .finish()
    }
}

impl CacheTokenService {
    /// Creates a service signing with `key`.
    ///
    /// # Errors
    /// Returns a configuration error if `config` is invalid, the key is
    /// unusable, or `config.algorithm` disagrees with the key.
    pub fn new(cache: CacheBackend, key: &KeyMaterial, config: TokenConfig) -> AuthResult<Self> {
        config
            .validate()
            .map_err(|e| AuthError::configuration(e.to_string()))?;
        let codec = TokenCodec::new(key, config.algorithm)?;
        Ok(Self {
            cache,
            codec,
            config,
        })
    }

    pub fn algorithm(&self) -> SigningAlgorithm {
        self.codec.algorithm()
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    pub fn cache(&self) -> &CacheBackend {
        &self.cache
    }

    pub(crate) fn access_ttl(&self) -> i64 {
        duration_secs(self.config.access_token_lifetime)
    }

    pub(crate) fn refresh_ttl(&self) -> i64 {
        duration_secs(self.config.refresh_token_lifetime)
    }

    /// Expiry of the access token minted alongside `refresh`.
    pub(crate) fn access_expiry(&self, refresh: &Payload) -> i64 {
        refresh.exp - self.refresh_ttl() + self.access_ttl()
    }

    /// Sign a pair sharing one issue time.
    pub(crate) fn mint(&self, claims: &TokenClaims) -> AuthResult<Minted> {
        if claims.sub.is_empty() {
            return Err(AuthError::validation("sub is required"));
        }

        let now = unix_now_secs();
        let access = Payload::issue(claims, now, self.config.access_token_lifetime);
        let refresh = Payload::issue(claims, now, self.config.refresh_token_lifetime);
        let pair = TokenPair {
            access_token: self.codec.encode(&access)?,
            refresh_token: self.codec.encode(&refresh)?,
        };

        metrics::counter!("webguard_tokens_minted_total").increment(1);
        Ok(Minted {
            access,
            refresh,
            pair,
        })
    }

    /// Verify signature and, optionally, expiry. Any failure is `None`.
    pub(crate) fn decode_checked(&self, token: &str, check_expiry: bool) -> Option<Payload> {
        let payload: Payload = match self.codec.decode(token) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::debug!(error = %err, "token rejected");
                return None;
            }
        };

        if check_expiry && payload.is_expired_at(unix_now_secs()) {
            tracing::debug!(jti = %payload.jti, "token expired");
            return None;
        }
        Some(payload)
    }

    pub(crate) fn encode_record(&self, refresh: &Payload, access_jti: &str) -> AuthResult<Vec<u8>> {
        record::encode(&refresh.extra, access_jti)
            .map_err(|e| AuthError::internal(format!("Failed to encode refresh record: {e}")))
    }

    async fn save_record(&self, refresh: &Payload, access_jti: &str) -> AuthResult<()> {
        let key = refresh_key(&refresh.jti);
        let value = self.encode_record(refresh, access_jti)?;

        let guard = self.cache.lock(&key, self.config.lock_timeout).await?;
        let written = self
            .cache
            .set(&key, &value, SetOptions::expire_at(refresh.exp))
            .await;
        guard.release().await?;
        written?;

        tracing::debug!(jti = %refresh.jti, "refresh record saved");
        Ok(())
    }

    async fn read_record(&self, jti: &str) -> AuthResult<Option<serde_json::Map<String, serde_json::Value>>> {
        let key = refresh_key(jti);

        let guard = self.cache.lock(&key, self.config.lock_timeout).await?;
        let value = self.cache.get(&key).await;
        guard.release().await?;

        value?
            .map(|bytes| {
                record::decode(&bytes).map_err(|e| {
                    AuthError::internal(format!("Corrupt refresh record {key}: {e}"))
                })
            })
            .transpose()
    }

    /// Denylist the paired access token if it may still be live, then delete
    /// the refresh record.
    async fn revoke(&self, refresh: &Payload) -> AuthResult<bool> {
        let access_exp = self.access_expiry(refresh);
        if access_exp > unix_now_secs() {
            if let Some(access_jti) = refresh.access_jti() {
                self.cache
                    .set(
                        &denylist_key(access_jti),
                        b"1",
                        SetOptions::expire_at(access_exp).only_if_absent(),
                    )
                    .await?;
            }
        }

        let deleted = self.cache.delete(&refresh_key(&refresh.jti)).await?;
        if deleted {
            tracing::debug!(jti = %refresh.jti, "refresh token revoked");
        }
        Ok(deleted)
    }

    async fn rotate(
        &self,
        claims: &TokenClaims,
        refresh_token: &str,
    ) -> AuthResult<Option<TokenPair>> {
        let Some(old) = self.validate_refresh_token(refresh_token, true).await? else {
            metrics::counter!("webguard_refresh_replays_total").increment(1);
            tracing::info!("refresh token rejected during rotation");
            return Ok(None);
        };

        if !self.revoke(&old).await? {
            metrics::counter!("webguard_refresh_replays_total").increment(1);
            tracing::info!(jti = %old.jti, "refresh token consumed concurrently");
            return Ok(None);
        }

        let pair = self.create_token(claims).await?;
        metrics::counter!("webguard_token_rotations_total").increment(1);
        Ok(Some(pair))
    }
}

#[async_trait]
impl TokenService for CacheTokenService {
    async fn create_token(&self, claims: &TokenClaims) -> AuthResult<TokenPair> {
        let minted = self.mint(claims)?;
        self.save_record(&minted.refresh, &minted.access.jti).await?;
        Ok(minted.pair)
    }

    async fn validate_access_token(
        &self,
        token: &str,
        check_expiry: bool,
    ) -> AuthResult<Option<Payload>> {
        let Some(payload) = self.decode_checked(token, check_expiry) else {
            return Ok(None);
        };

        if self.cache.get(&denylist_key(&payload.jti)).await?.is_some() {
            tracing::debug!(jti = %payload.jti, "access token denylisted");
            return Ok(None);
        }
        Ok(Some(payload))
    }

    async fn validate_refresh_token(
        &self,
        token: &str,
        check_expiry: bool,
    ) -> AuthResult<Option<Payload>> {
        let Some(mut payload) = self.decode_checked(token, check_expiry) else {
            return Ok(None);
        };

        let Some(stored) = self.read_record(&payload.jti).await? else {
            tracing::debug!(jti = %payload.jti, "refresh record absent");
            return Ok(None);
        };
        payload.extra.extend(stored);
        Ok(Some(payload))
    }

    async fn invalidate_token(&self, refresh_token: &str) -> AuthResult<bool> {
        match self.validate_refresh_token(refresh_token, true).await? {
            Some(payload) => self.revoke(&payload).await,
            None => Ok(false),
        }
    }

    async fn update_token(
        &self,
        claims: &TokenClaims,
        refresh_token: &str,
    ) -> AuthResult<Option<TokenPair>> {
        let Some(old) = self.decode_checked(refresh_token, true) else {
            return Ok(None);
        };

        let guard = self.cache.lock(&old.jti, self.config.lock_timeout).await?;
        let rotated = self.rotate(claims, refresh_token).await;
        release_rotation_lock(guard, &old.jti, rotated).await
    }
}
