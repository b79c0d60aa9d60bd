//! Token payloads.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::token::record::ACCESS_JTI;

/// Claims supplied by the caller when minting or rotating a pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject. Required and non-empty.
    pub sub: String,

    #[serde(default)]
    pub scope: BTreeSet<String>,

    /// Arbitrary extra claims copied into both tokens.
    #[serde(default)]
    pub extra: Map<String, Value>,
}

impl TokenClaims {
    pub fn new(sub: impl Into<String>) -> Self {
        Self {
            sub: sub.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_scope<I, S>(mut self, scope: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scope = scope.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Decoded contents of an access or refresh token.
///
/// Caller-supplied fields travel in their own `extra` object, so a token
/// carries exactly `{"sub", "exp", "iat", "jti", "scope", "extra"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub sub: String,
    /// Expiry, unix seconds.
    pub exp: i64,
    /// Issue time, unix seconds.
    pub iat: i64,
    /// Unique token id (32 lowercase hex characters).
    pub jti: String,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub scope: BTreeSet<String>,
    #[serde(default)]
    pub extra: Map<String, Value>,
}

impl Payload {
    /// Builds a payload issued at `now` with a fresh id.
    pub(crate) fn issue(claims: &TokenClaims, now: i64, lifetime: Duration) -> Self {
        Self {
            sub: claims.sub.clone(),
            exp: now.saturating_add(duration_secs(lifetime)),
            iat: now,
            jti: Uuid::new_v4().simple().to_string(),
            scope: claims.scope.clone(),
            extra: claims.extra.clone(),
        }
    }

    /// The access token id paired with a refresh token, once the refresh
    /// record has been merged in.
    #[must_use]
    pub fn access_jti(&self) -> Option<&str> {
        self.extra.get(ACCESS_JTI).and_then(Value::as_str)
    }

    #[must_use]
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.exp <= now
    }
}

/// Freshly minted access/refresh pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

pub(crate) fn duration_secs(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}
