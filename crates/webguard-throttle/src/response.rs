//! Rate-limit denial response.

use axum::http::header::{LOCATION, RETRY_AFTER};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

/// A request rejected by at least one rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    pub path: String,
    /// Whole seconds until the longest exceeded window frees a slot.
    pub retry_after: u64,
}

impl Denial {
    /// Build a denial from the waits reported by the limiter.
    pub fn from_waits(path: impl Into<String>, waits: &[f64]) -> Self {
        let longest = waits.iter().copied().fold(0.0_f64, f64::max);
        Self {
            path: path.into(),
            retry_after: longest.ceil().max(0.0) as u64,
        }
    }
}

impl IntoResponse for Denial {
    fn into_response(self) -> Response {
        let mut response = StatusCode::TOO_MANY_REQUESTS.into_response();
        let headers = response.headers_mut();
        headers.insert(RETRY_AFTER, HeaderValue::from(self.retry_after));
        if let Ok(location) = HeaderValue::from_str(&self.path) {
            headers.insert(LOCATION, location);
        }
        response
    }
}
