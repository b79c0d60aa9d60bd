//! Caller identity and the authentication collaborators.
//!
//! The gate never authenticates anyone itself. An [`Authenticator`] resolves
//! an authenticated user from the request; when none does, an
//! [`AnonymousBackend`] either recognises an existing anonymous session or
//! allocates a new one with [`AnonymousBackend::issue_identity`].

use std::collections::BTreeSet;

use async_trait::async_trait;
use axum::http::header::{AUTHORIZATION, COOKIE, LOCATION, SET_COOKIE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use cookie::{Cookie, SameSite};
use uuid::Uuid;

use crate::ThrottleResult;
use crate::config::ThrottleConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdentityKind {
    User,
    Anonymous,
}

/// Who is making the request, as seen by the rate limiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    kind: IdentityKind,
    identifier: String,
    scope: BTreeSet<String>,
}

impl Identity {
    /// An authenticated caller with the given scope.
    pub fn user<I, S>(identifier: impl Into<String>, scope: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: IdentityKind::User,
            identifier: identifier.into(),
            scope: scope.into_iter().map(Into::into).collect(),
        }
    }

    /// An anonymous session. Anonymous callers carry no scope.
    pub fn anonymous(identifier: impl Into<String>) -> Self {
        Self {
            kind: IdentityKind::Anonymous,
            identifier: identifier.into(),
            scope: BTreeSet::new(),
        }
    }

    /// Prefix of every window key counted for this caller.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn scope(&self) -> &BTreeSet<String> {
        &self.scope
    }

    pub fn is_user(&self) -> bool {
        self.kind == IdentityKind::User
    }
}

/// The parts of a request the gate and its collaborators look at.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
}

impl RequestContext {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
        }
    }

    /// Add a header, ignoring names or values that are not valid HTTP.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name),
            HeaderValue::try_from(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn from_request<B>(request: &Request<B>) -> Self {
        Self {
            method: request.method().clone(),
            path: request.uri().path().to_string(),
            headers: request.headers().clone(),
        }
    }

    /// Value of the first cookie called `name` across all `Cookie` headers.
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(Cookie::split_parse)
            .filter_map(Result::ok)
            .find(|cookie| cookie.name() == name)
            .map(|cookie| cookie.value().to_string())
    }

    /// Token from an `Authorization: Bearer <token>` header.
    pub fn bearer_token(&self) -> Option<&str> {
        let header = self.headers.get(AUTHORIZATION)?.to_str().ok()?;
        let (scheme, token) = header.split_once(' ')?;
        let token = token.trim();
        (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
    }
}

/// Resolves authenticated users.
///
/// `Ok(None)` means "not authenticated by me"; errors are reserved for
/// collaborator failures such as an unreachable token store.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, request: &RequestContext) -> ThrottleResult<Option<Identity>>;
}

/// Recognises and allocates anonymous sessions.
#[async_trait]
pub trait AnonymousBackend: Authenticator {
    /// Allocate a session for a caller nobody recognised.
    async fn issue_identity(&self, request: &RequestContext) -> ThrottleResult<IssuedSession>;
}

/// A freshly allocated anonymous session, answered as a redirect back to the
/// requested path so the client retries with the cookie set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedSession {
    pub identity: Identity,
    pub location: String,
    pub set_cookie: String,
}

impl IntoResponse for IssuedSession {
    fn into_response(self) -> Response {
        (
            StatusCode::TEMPORARY_REDIRECT,
            [(LOCATION, self.location), (SET_COOKIE, self.set_cookie)],
        )
            .into_response()
    }
}

/// Anonymous sessions carried in a cookie holding a random 32-hex id.
#[derive(Debug, Clone)]
pub struct SessionCookieBackend {
    cookie_name: String,
    max_age: time::Duration,
    secure: bool,
}

impl SessionCookieBackend {
    pub fn new(config: &ThrottleConfig) -> Self {
        let max_age = i64::try_from(config.session_max_age.as_secs()).unwrap_or(i64::MAX);
        Self {
            cookie_name: config.session_cookie.clone(),
            max_age: time::Duration::seconds(max_age),
            secure: config.secure_cookie,
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    fn is_session_id(value: &str) -> bool {
        value.len() == 32 && value.bytes().all(|b| b.is_ascii_hexdigit())
    }
}

impl Default for SessionCookieBackend {
    fn default() -> Self {
        Self::new(&ThrottleConfig::default())
    }
}

#[async_trait]
impl Authenticator for SessionCookieBackend {
    async fn authenticate(&self, request: &RequestContext) -> ThrottleResult<Option<Identity>> {
        Ok(request
            .cookie(&self.cookie_name)
            .filter(|value| Self::is_session_id(value))
            .map(Identity::anonymous))
    }
}

#[async_trait]
impl AnonymousBackend for SessionCookieBackend {
    async fn issue_identity(&self, request: &RequestContext) -> ThrottleResult<IssuedSession> {
        let session_id = Uuid::new_v4().simple().to_string();
        let cookie = Cookie::build((self.cookie_name.clone(), session_id.clone()))
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .path("/")
            .max_age(self.max_age)
            .build();

        tracing::debug!(path = %request.path, "Issued anonymous session");

        Ok(IssuedSession {
            identity: Identity::anonymous(session_id),
            location: request.path.clone(),
            set_cookie: cookie.encoded().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_lookup() {
        let request = RequestContext::new(Method::GET, "/")
            .with_header("cookie", "a=1; th-session=abc")
            .with_header("cookie", "th-session=later");
        assert_eq!(request.cookie("th-session").as_deref(), Some("abc"));
        assert_eq!(request.cookie("a").as_deref(), Some("1"));
        assert!(request.cookie("missing").is_none());
    }

    #[test]
    fn test_bearer_token() {
        let request =
            RequestContext::new(Method::GET, "/").with_header("authorization", "Bearer abc.def");
        assert_eq!(request.bearer_token(), Some("abc.def"));

        let basic =
            RequestContext::new(Method::GET, "/").with_header("authorization", "Basic Zm9v");
        assert!(basic.bearer_token().is_none());
        assert!(RequestContext::new(Method::GET, "/").bearer_token().is_none());
    }

    #[tokio::test]
    async fn test_issue_then_recognise_session() {
        let backend = SessionCookieBackend::default();
        let request = RequestContext::new(Method::GET, "/items/");

        assert!(backend.authenticate(&request).await.unwrap().is_none());

        let issued = backend.issue_identity(&request).await.unwrap();
        assert_eq!(issued.location, "/items/");
        assert!(!issued.identity.is_user());
        assert!(issued.set_cookie.starts_with("th-session="));
        assert!(issued.set_cookie.contains("HttpOnly"));

        let cookie = format!("th-session={}", issued.identity.identifier());
        let returning = request.with_header("cookie", &cookie);
        let identity = backend.authenticate(&returning).await.unwrap().unwrap();
        assert_eq!(identity, issued.identity);
    }

    #[tokio::test]
    async fn test_forged_session_value_is_ignored() {
        let backend = SessionCookieBackend::default();
        let request =
            RequestContext::new(Method::GET, "/").with_header("cookie", "th-session=admin");
        assert!(backend.authenticate(&request).await.unwrap().is_none());
    }

    #[test]
    fn test_issued_session_response() {
        let issued = IssuedSession {
            identity: Identity::anonymous("0123456789abcdef0123456789abcdef"),
            location: "/2/".to_string(),
            set_cookie: "th-session=0123456789abcdef0123456789abcdef; Path=/".to_string(),
        };
        let response = issued.into_response();
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(response.headers()[LOCATION], "/2/");
        assert!(response.headers().contains_key(SET_COOKIE));
    }
}
