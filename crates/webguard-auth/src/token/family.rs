//! Token families.
//!
//! [`FamilyTokenService`] keeps every live refresh token of a subject in a
//! sorted set so a session holder can list the subject's sessions and revoke
//! any one of them. Record writes and revocations run as atomic procedures
//! that update the record, the family and the denylist together.

use async_trait::async_trait;
use webguard_cache::{CacheBackend, unix_now_secs};

use crate::AuthResult;
use crate::config::TokenConfig;
use crate::token::claims::{Payload, TokenClaims, TokenPair};
use crate::token::keys::{KeyMaterial, SigningAlgorithm};
use crate::token::procedures::{InvalidateRefresh, InvalidateTarget, SaveRefresh, SearchFamily};
use crate::token::service::{
    CacheTokenService, DENYLIST_PREFIX, TokenService, family_key, refresh_key,
    release_rotation_lock,
};

/// Token service with per-subject family tracking.
#[derive(Debug)]
pub struct FamilyTokenService {
    inner: CacheTokenService,
}

impl FamilyTokenService {
    /// # Errors
    /// See [`CacheTokenService::new`].
    pub fn new(cache: CacheBackend, key: &KeyMaterial, config: TokenConfig) -> AuthResult<Self> {
        Ok(Self::from_service(CacheTokenService::new(cache, key, config)?))
    }

    pub fn from_service(inner: CacheTokenService) -> Self {
        Self { inner }
    }

    pub fn algorithm(&self) -> SigningAlgorithm {
        self.inner.algorithm()
    }

    /// List the refresh-token ids of the presenter's family, oldest first.
    ///
    /// Members older than the refresh lifetime are pruned on the way.
    /// Returns `None` if `refresh_token` itself is not valid.
    pub async fn search_token(&self, refresh_token: &str) -> AuthResult<Option<Vec<String>>> {
        let Some(payload) = self
            .inner
            .validate_refresh_token(refresh_token, true)
            .await?
        else {
            return Ok(None);
        };

        let procedure = SearchFamily {
            family_key: family_key(&payload.sub),
            now: unix_now_secs(),
            refresh_ttl: self.inner.refresh_ttl(),
        };
        let members = self.inner.cache().run_procedure(&procedure).await?;
        Ok(Some(members))
    }

    /// Revoke `target_jti`, a member of the presenter's family.
    ///
    /// Returns `false` if `refresh_token` is not valid, or if `target_jti` is
    /// not a live member of the presenter's family.
    pub async fn invalidate_family_member(
        &self,
        refresh_token: &str,
        target_jti: &str,
    ) -> AuthResult<bool> {
        let Some(caller) = self
            .inner
            .validate_refresh_token(refresh_token, true)
            .await?
        else {
            return Ok(false);
        };

        let procedure = InvalidateRefresh {
            family_key: family_key(&caller.sub),
            record_key: refresh_key(target_jti),
            denylist_prefix: DENYLIST_PREFIX,
            jti: target_jti.to_string(),
            target: InvalidateTarget::Member,
            now: unix_now_secs(),
            access_ttl: self.inner.access_ttl(),
        };
        let revoked = self.inner.cache().run_procedure(&procedure).await?;
        if revoked {
            tracing::info!(sub = %caller.sub, jti = %target_jti, "family member revoked");
        }
        Ok(revoked)
    }

    async fn revoke_own(&self, refresh: &Payload) -> AuthResult<bool> {
        let procedure = InvalidateRefresh {
            family_key: family_key(&refresh.sub),
            record_key: refresh_key(&refresh.jti),
            denylist_prefix: DENYLIST_PREFIX,
            jti: refresh.jti.clone(),
            target: InvalidateTarget::Own {
                issued_at: refresh.exp - self.inner.refresh_ttl(),
                access_jti: refresh.access_jti().map(str::to_string),
            },
            now: unix_now_secs(),
            access_ttl: self.inner.access_ttl(),
        };
        Ok(self.inner.cache().run_procedure(&procedure).await?)
    }

    async fn rotate(
        &self,
        claims: &TokenClaims,
        refresh_token: &str,
    ) -> AuthResult<Option<TokenPair>> {
        let Some(old) = self
            .inner
            .validate_refresh_token(refresh_token, true)
            .await?
        else {
            metrics::counter!("webguard_refresh_replays_total").increment(1);
            return Ok(None);
        };

        if !self.revoke_own(&old).await? {
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
impl TokenService for FamilyTokenService {
    async fn create_token(&self, claims: &TokenClaims) -> AuthResult<TokenPair> {
        let minted = self.inner.mint(claims)?;
        let refresh = &minted.refresh;

        let procedure = SaveRefresh {
            record_key: refresh_key(&refresh.jti),
            family_key: family_key(&refresh.sub),
            jti: refresh.jti.clone(),
            record: self.inner.encode_record(refresh, &minted.access.jti)?,
            issued_at: refresh.iat,
            expires_at: refresh.exp,
            family_ttl: self.inner.refresh_ttl(),
        };

        let lock_timeout = self.inner.config().lock_timeout;
        let guard = self.inner.cache().lock(&refresh.jti, lock_timeout).await?;
        let saved = self.inner.cache().run_procedure(&procedure).await;
        guard.release().await?;
        saved?;

        tracing::debug!(sub = %refresh.sub, jti = %refresh.jti, "refresh token added to family");
        Ok(minted.pair)
    }

    async fn validate_access_token(
        &self,
        token: &str,
        check_expiry: bool,
    ) -> AuthResult<Option<Payload>> {
        self.inner.validate_access_token(token, check_expiry).await
    }

    async fn validate_refresh_token(
        &self,
        token: &str,
        check_expiry: bool,
    ) -> AuthResult<Option<Payload>> {
        self.inner.validate_refresh_token(token, check_expiry).await
    }

    async fn invalidate_token(&self, refresh_token: &str) -> AuthResult<bool> {
        match self
            .inner
            .validate_refresh_token(refresh_token, true)
            .await?
        {
            Some(payload) => self.revoke_own(&payload).await,
            None => Ok(false),
        }
    }

    async fn update_token(
        &self,
        claims: &TokenClaims,
        refresh_token: &str,
    ) -> AuthResult<Option<TokenPair>> {
        let Some(old) = self.inner.decode_checked(refresh_token, true) else {
            return Ok(None);
        };

        let lock_timeout = self.inner.config().lock_timeout;
        let guard = self.inner.cache().lock(&old.jti, lock_timeout).await?;
        let rotated = self.rotate(claims, refresh_token).await;
        release_rotation_lock(guard, &old.jti, rotated).await
    }
}
