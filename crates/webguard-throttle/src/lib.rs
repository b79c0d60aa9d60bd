//! # webguard-throttle
//!
//! Declarative sliding-window rate limiting over the shared webguard cache.
//!
//! Rules are declared per operation into a [`RuleRegistry`] at startup. At
//! request time the [`ThrottleGate`] resolves the caller (an authenticated
//! user, an existing anonymous session, or a freshly issued one), filters
//! the operation's rules by method, scope and audience, and asks the
//! [`Limiter`] to count the request against every applicable window in one
//! atomic step.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use webguard_cache::CacheBackend;
//! use webguard_throttle::{
//!     RuleDeclaration, RuleRegistry, SessionCookieBackend, SlidingWindowLimiter, ThrottleGate,
//! };
//!
//! # fn main() -> webguard_throttle::ThrottleResult<()> {
//! let mut registry = RuleRegistry::new();
//! registry.declare("items", RuleDeclaration::new(4, Duration::from_secs(10)).scope(["user"]))?;
//! registry.declare("items", RuleDeclaration::new(2, Duration::from_secs(10)).scope(["anno"]))?;
//!
//! let gate = ThrottleGate::new(
//!     Arc::new(registry),
//!     Arc::new(SlidingWindowLimiter::new(CacheBackend::new_local())),
//!     Arc::new(SessionCookieBackend::default()),
//! );
//! # let _ = gate;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod gate;
pub mod identity;
pub mod limiter;
pub mod registry;
pub mod response;
pub mod rule;

pub use config::{DEFAULT_SESSION_COOKIE, ThrottleConfig};
pub use error::ThrottleError;
pub use gate::{Decision, GateState, ThrottleGate, throttle_middleware};
pub use identity::{
    AnonymousBackend, Authenticator, Identity, IssuedSession, RequestContext, SessionCookieBackend,
};
pub use limiter::{Limiter, SlidingWindowLimiter, WindowState, window_key};
pub use registry::RuleRegistry;
pub use response::Denial;
pub use rule::{ANONYMOUS_TAG, LimitRule, RuleDeclaration, RuleSet, USER_TAG};

/// Result type for throttle operations.
pub type ThrottleResult<T> = Result<T, ThrottleError>;
