//! Wall-clock helpers.
//!
//! Every timestamp that crosses process boundaries (token claims, window
//! scores, expire-at instants) is unix time.

use time::OffsetDateTime;

/// Current unix time in fractional seconds.
#[must_use]
pub fn unix_now() -> f64 {
    OffsetDateTime::now_utc().unix_timestamp_nanos() as f64 / 1_000_000_000.0
}

/// Current unix time in whole seconds.
#[must_use]
pub fn unix_now_secs() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fractional_and_whole_agree() {
        let whole = unix_now_secs();
        let fractional = unix_now();
        assert!((fractional - whole as f64).abs() < 2.0);
    }
}
