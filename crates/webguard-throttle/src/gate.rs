//! Request gate: identity, rule resolution and the limiter in one check.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::ThrottleResult;
use crate::identity::{AnonymousBackend, Authenticator, Identity, IssuedSession, RequestContext};
use crate::limiter::Limiter;
use crate::registry::RuleRegistry;
use crate::response::Denial;

/// Outcome of [`ThrottleGate::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Let the request through. `identity` is `None` when the operation
    /// carries no rules and nobody was asked who the caller is.
    Admit { identity: Option<Identity> },
    Deny(Denial),
    /// The caller is unknown; hand out an anonymous session first.
    Issue(IssuedSession),
}

impl Decision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admit { .. })
    }
}

/// Gates requests against the rules declared in a [`RuleRegistry`].
pub struct ThrottleGate {
    registry: Arc<RuleRegistry>,
    limiter: Arc<dyn Limiter>,
    authenticator: Option<Arc<dyn Authenticator>>,
    anonymous: Arc<dyn AnonymousBackend>,
    enabled: bool,
}

impl std::fmt::Debug for ThrottleGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThrottleGate")
            .field("operations", &self.registry.len())
            .field("authenticator", &self.authenticator.is_some())
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl ThrottleGate {
    pub fn new(
        registry: Arc<RuleRegistry>,
        limiter: Arc<dyn Limiter>,
        anonymous: Arc<dyn AnonymousBackend>,
    ) -> Self {
        Self {
            registry,
            limiter,
            authenticator: None,
            anonymous,
            enabled: true,
        }
    }

    /// Resolve authenticated users before falling back to anonymous sessions.
    #[must_use]
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    /// Check one request to `operation`.
    ///
    /// # Errors
    /// Propagates cache and collaborator failures; never admits on error.
    pub async fn check(
        &self,
        operation: &str,
        request: &RequestContext,
    ) -> ThrottleResult<Decision> {
        if !self.enabled {
            return Ok(Decision::Admit { identity: None });
        }
        let Some(rule_set) = self.registry.resolve(operation) else {
            return Ok(Decision::Admit { identity: None });
        };

        let identity = match self.identify(request).await? {
            Some(identity) => identity,
            None => {
                let issued = self.anonymous.issue_identity(request).await?;
                return Ok(Decision::Issue(issued));
            }
        };

        let rules = rule_set.should_limit(request.method.as_str(), &identity);
        let waits = self.limiter.is_deny(identity.identifier(), &rules).await?;

        if waits.is_empty() {
            return Ok(Decision::Admit {
                identity: Some(identity),
            });
        }

        let denial = Denial::from_waits(request.path.clone(), &waits);
        tracing::info!(
            operation = %operation,
            identifier = %identity.identifier(),
            retry_after = denial.retry_after,
            "Request throttled"
        );
        Ok(Decision::Deny(denial))
    }

    async fn identify(&self, request: &RequestContext) -> ThrottleResult<Option<Identity>> {
        if let Some(authenticator) = &self.authenticator {
            if let Some(identity) = authenticator.authenticate(request).await? {
                return Ok(Some(identity));
            }
        }
        self.anonymous.authenticate(request).await
    }
}

/// Middleware state: the shared gate plus the operation a route serves.
#[derive(Debug, Clone)]
pub struct GateState {
    pub gate: Arc<ThrottleGate>,
    pub operation: Arc<str>,
}

impl GateState {
    pub fn new(gate: Arc<ThrottleGate>, operation: &str) -> Self {
        Self {
            gate,
            operation: Arc::from(operation),
        }
    }
}

/// Axum middleware enforcing the gate on a route.
///
/// Admitted requests continue with the resolved [`Identity`] in their
/// extensions. Cache failures answer 503.
pub async fn throttle_middleware(
    State(state): State<GateState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let context = RequestContext::from_request(&req);

    match state.gate.check(&state.operation, &context).await {
        Ok(Decision::Admit { identity }) => {
            if let Some(identity) = identity {
                req.extensions_mut().insert(identity);
            }
            next.run(req).await
        }
        Ok(Decision::Deny(denial)) => denial.into_response(),
        Ok(Decision::Issue(issued)) => issued.into_response(),
        Err(err) => {
            tracing::error!(
                operation = %state.operation,
                path = %context.path,
                error = %err,
                "Rate-limit check failed"
            );
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}
