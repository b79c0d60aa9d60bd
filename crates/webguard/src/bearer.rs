//! Bearer access tokens as throttle identities.

use std::sync::Arc;

use async_trait::async_trait;
use webguard_auth::{AuthError, TokenService};
use webguard_throttle::{Authenticator, Identity, RequestContext, ThrottleError, ThrottleResult};

/// Authenticates `Authorization: Bearer <access token>` through a
/// [`TokenService`].
///
/// The identity is the token's `sub` and its scope is the token's scope. A
/// token that does not validate leaves the caller unauthenticated, so the
/// gate falls back to the anonymous session.
#[derive(Clone)]
pub struct BearerTokenAuthenticator {
    tokens: Arc<dyn TokenService>,
}

impl BearerTokenAuthenticator {
    pub fn new(tokens: Arc<dyn TokenService>) -> Self {
        Self { tokens }
    }
}

impl std::fmt::Debug for BearerTokenAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerTokenAuthenticator").finish_non_exhaustive()
    }
}

#[async_trait]
impl Authenticator for BearerTokenAuthenticator {
    async fn authenticate(&self, request: &RequestContext) -> ThrottleResult<Option<Identity>> {
        let Some(token) = request.bearer_token() else {
            return Ok(None);
        };

        let payload = self
            .tokens
            .validate_access_token(token, true)
            .await
            .map_err(|err| match err {
                AuthError::Cache(cache) => ThrottleError::Cache(cache),
                other => ThrottleError::authentication(other.to_string()),
            })?;

        match payload {
            Some(payload) => Ok(Some(Identity::user(payload.sub, payload.scope))),
            None => {
                tracing::debug!(path = %request.path, "Bearer token rejected");
                Ok(None)
            }
        }
    }
}
