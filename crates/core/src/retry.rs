use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// When a throttled caller may retry.
///
/// Carries either a relative delay in whole seconds or an absolute wall-clock
/// time, matching the two value forms of the HTTP `Retry-After` header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryAfter {
    /// Retry after this many seconds.
    Seconds(u64),
    /// Retry at this absolute time.
    At(DateTime<Utc>),
}

impl RetryAfter {
    /// Parse a `Retry-After` header value: numeric seconds or an HTTP date.
    #[must_use]
    pub fn from_header_value(value: &str) -> Option<Self> {
        let value = value.trim();
        if let Ok(secs) = value.parse::<u64>() {
            return Some(Self::Seconds(secs));
        }
        DateTime::parse_from_rfc2822(value)
            .ok()
            .map(|dt| Self::At(dt.with_timezone(&Utc)))
    }

    /// Render as a `Retry-After` header value.
    #[must_use]
    pub fn header_value(&self) -> String {
        match self {
            Self::Seconds(secs) => secs.to_string(),
            Self::At(at) => at.to_rfc2822(),
        }
    }

    /// The remaining wait relative to `now`. Absolute times already in the
    /// past yield a zero delay.
    #[must_use]
    pub fn delay_from(&self, now: DateTime<Utc>) -> Duration {
        match self {
            Self::Seconds(secs) => Duration::from_secs(*secs),
            Self::At(at) => (*at - now).to_std().unwrap_or(Duration::ZERO),
        }
    }
}

impl std::fmt::Display for RetryAfter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.header_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numeric_seconds() {
        assert_eq!(
            RetryAfter::from_header_value("5"),
            Some(RetryAfter::Seconds(5))
        );
        assert_eq!(
            RetryAfter::from_header_value(" 120 "),
            Some(RetryAfter::Seconds(120))
        );
    }

    #[test]
    fn parses_http_date() {
        let parsed = RetryAfter::from_header_value("Wed, 21 Oct 2026 07:28:00 GMT")
            .expect("http date should parse");
        match parsed {
            RetryAfter::At(at) => assert_eq!(at.to_rfc2822(), "Wed, 21 Oct 2026 07:28:00 +0000"),
            RetryAfter::Seconds(_) => panic!("expected absolute time"),
        }
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(RetryAfter::from_header_value("soon"), None);
    }

    #[test]
    fn header_value_roundtrip_seconds() {
        let ra = RetryAfter::Seconds(30);
        assert_eq!(ra.header_value(), "30");
        assert_eq!(RetryAfter::from_header_value(&ra.header_value()), Some(ra));
    }

    #[test]
    fn delay_from_absolute_past_is_zero() {
        let now = Utc::now();
        let ra = RetryAfter::At(now - chrono::Duration::seconds(10));
        assert_eq!(ra.delay_from(now), Duration::ZERO);
    }

    #[test]
    fn delay_from_seconds() {
        let ra = RetryAfter::Seconds(7);
        assert_eq!(ra.delay_from(Utc::now()), Duration::from_secs(7));
    }
}
