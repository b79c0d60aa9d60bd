// Tracing initialization with a configurable and reloadable log level.
use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

static LOG_RELOAD_HANDLE: OnceLock<reload::Handle<EnvFilter, tracing_subscriber::Registry>> =
    OnceLock::new();

/// Install the global subscriber. `RUST_LOG` wins over `level` when set.
///
/// Safe to call more than once; only the first call installs anything.
pub fn init_tracing_with_level(level: &str) {
    let base_filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|_| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| parse_filter(level));

    let (reload_layer, handle) = reload::Layer::new(base_filter);
    if LOG_RELOAD_HANDLE.set(handle).is_err() {
        return;
    }

    let _ = tracing_subscriber::registry()
        .with(reload_layer)
        .with(fmt::layer())
        .try_init();
}

/// Apply a new logging level at runtime. Returns `false` when tracing was not
/// initialized through this module.
pub fn apply_logging_level(level: &str) -> bool {
    match LOG_RELOAD_HANDLE.get() {
        Some(handle) => handle
            .modify(|filter| *filter = parse_filter(level))
            .is_ok(),
        None => false,
    }
}

// An unparsable directive falls back to `info` instead of silencing everything.
fn parse_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|err| {
        eprintln!("invalid log level '{level}': {err}, using 'info'");
        EnvFilter::new("info")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_parsing() {
        assert_eq!(parse_filter("debug").to_string(), "debug");
        assert_eq!(
            parse_filter("webguard_throttle=trace").to_string(),
            "webguard_throttle=trace"
        );
        assert_eq!(parse_filter("webguard=loud").to_string(), "info");
    }

    #[test]
    fn test_reload_after_init() {
        init_tracing_with_level("warn");
        assert!(apply_logging_level("debug"));
    }
}
