//! Server clock helpers.

use chrono::{DateTime, Utc};

/// Parses an HTTP `Date` header (RFC 2822 / IMF-fixdate) into epoch milliseconds.
///
/// Returns `None` for anything that does not parse.
pub fn parse_http_date(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|date| date.timestamp_millis())
}

/// Current wall clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
