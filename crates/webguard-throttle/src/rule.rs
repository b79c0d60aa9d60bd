//! Rate-limit rules.
//!
//! A rule is declared with two reserved audience tags in its scope: `user`
//! (authenticated callers) and `anno` (anonymous sessions). Naming neither or
//! both targets every caller; naming exactly one targets only that audience.
//! The remaining scope tags must intersect the caller's scope.

use std::collections::BTreeSet;
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::ThrottleResult;
use crate::error::ThrottleError;
use crate::identity::Identity;

/// Audience tag for authenticated callers.
pub const USER_TAG: &str = "user";
/// Audience tag for anonymous sessions.
pub const ANONYMOUS_TAG: &str = "anno";

/// One limit as declared on an operation.
///
/// ```
/// use std::time::Duration;
/// use webguard_throttle::RuleDeclaration;
///
/// let decl = RuleDeclaration::new(4, Duration::from_secs(10))
///     .methods(["get"])
///     .scope(["user", "write"]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleDeclaration {
    max_requests: u64,
    interval: Duration,
    throttle_key: Option<String>,
    methods: Vec<String>,
    scope: Vec<String>,
}

impl RuleDeclaration {
    pub fn new(max_requests: u64, interval: Duration) -> Self {
        Self {
            max_requests,
            interval,
            throttle_key: None,
            methods: Vec::new(),
            scope: Vec::new(),
        }
    }

    /// Explicit counter key. Rules sharing a key share a window.
    #[must_use]
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.throttle_key = Some(key.into());
        self
    }

    /// HTTP methods the rule applies to. Empty means all.
    #[must_use]
    pub fn methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.methods = methods.into_iter().map(Into::into).collect();
        self
    }

    /// Scope tags, including the audience tags `user` / `anno`.
    #[must_use]
    pub fn scope<I, S>(mut self, scope: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scope = scope.into_iter().map(Into::into).collect();
        self
    }

    /// Resolve the declaration into a rule owned by `operation`.
    pub(crate) fn into_rule(self, operation: &str) -> ThrottleResult<LimitRule> {
        if self.interval.is_zero() {
            return Err(ThrottleError::configuration(format!(
                "Rule on '{operation}' has a zero interval"
            )));
        }

        let methods: BTreeSet<String> = self
            .methods
            .iter()
            .map(|method| method.to_ascii_uppercase())
            .collect();
        let declared: BTreeSet<String> = self.scope.into_iter().collect();

        let throttle_key = match self.throttle_key {
            Some(key) => key,
            None => derive_key(operation, self.interval, &methods, &declared),
        };

        let has_user = declared.contains(USER_TAG);
        let has_anon = declared.contains(ANONYMOUS_TAG);
        let scope = declared
            .into_iter()
            .filter(|tag| tag != USER_TAG && tag != ANONYMOUS_TAG)
            .collect();

        Ok(LimitRule {
            max_requests: self.max_requests,
            interval: self.interval,
            throttle_key,
            methods,
            scope,
            for_user: has_user || has_user == has_anon,
            for_anon: has_anon || has_user == has_anon,
        })
    }
}

// Stable across restarts: only declaration content goes in.
fn derive_key(
    operation: &str,
    interval: Duration,
    methods: &BTreeSet<String>,
    declared_scope: &BTreeSet<String>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(operation.as_bytes());
    hasher.update([0]);
    hasher.update(interval.as_millis().to_string().as_bytes());
    for method in methods {
        hasher.update([0]);
        hasher.update(method.as_bytes());
    }
    hasher.update([0xff]);
    for tag in declared_scope {
        hasher.update([0]);
        hasher.update(tag.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// A resolved, immutable rate-limit rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitRule {
    pub max_requests: u64,
    pub interval: Duration,
    /// Suffix of the per-identifier window key.
    pub throttle_key: String,
    /// Upper-cased methods. Empty means all.
    pub methods: BTreeSet<String>,
    /// Scope tags without the audience tags. Empty means any scope.
    pub scope: BTreeSet<String>,
    pub for_user: bool,
    pub for_anon: bool,
}

impl LimitRule {
    /// Whether this rule counts a `method` request by `identity`.
    pub fn applies_to(&self, method: &str, identity: &Identity) -> bool {
        if !self.methods.is_empty() && !self.methods.contains(method) {
            return false;
        }

        let scope_matches =
            self.scope.is_empty() || self.scope.iter().any(|tag| identity.scope().contains(tag));
        if !scope_matches {
            return false;
        }

        if identity.is_user() {
            self.for_user
        } else {
            self.for_anon
        }
    }
}

/// All rules stacked on one operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<LimitRule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rules with equal keys are all kept and count against one window.
    pub(crate) fn add(&mut self, rule: LimitRule) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[LimitRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules that apply to a `method` request by `identity`.
    pub fn should_limit(&self, method: &str, identity: &Identity) -> Vec<&LimitRule> {
        self.rules
            .iter()
            .filter(|rule| rule.applies_to(method, identity))
            .collect()
    }
}
