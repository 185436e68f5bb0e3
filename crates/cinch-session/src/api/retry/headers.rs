//! Server-directed wait times from rate-limit response headers.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::error::ResponseHeaders;

/// Parse a non-negative, finite number.
fn non_negative(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
}

/// Seconds as a duration. Values too large to represent saturate, so they
/// still fail the retry ceiling check instead of panicking.
fn seconds(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// The wait a provider asked for, if the headers carry a usable one.
///
/// Checked in order: `retry-after-ms` (milliseconds), `retry-after` as
/// seconds, `retry-after` as an HTTP-date relative to `now`. A date in the
/// past is not usable. Header names are expected lowercased.
pub fn retry_after(headers: &ResponseHeaders, now: DateTime<Utc>) -> Option<Duration> {
    if let Some(ms) = headers.get("retry-after-ms").and_then(|v| non_negative(v)) {
        return Some(seconds(ms / 1000.0));
    }

    let value = headers.get("retry-after")?;
    if let Some(secs) = non_negative(value) {
        return Some(seconds(secs));
    }

    let date = DateTime::parse_from_rfc2822(value.trim()).ok()?;
    let wait = date.with_timezone(&Utc) - now;
    wait.to_std().ok().filter(|d| !d.is_zero())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn headers(pairs: &[(&str, &str)]) -> ResponseHeaders {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2015, 10, 21, 7, 27, 0).unwrap()
    }

    #[test]
    fn milliseconds_take_precedence() {
        let h = headers(&[("retry-after-ms", "1500"), ("retry-after", "30")]);
        assert_eq!(retry_after(&h, now()), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn whole_seconds() {
        let h = headers(&[("retry-after", "2")]);
        assert_eq!(retry_after(&h, now()), Some(Duration::from_secs(2)));
    }

    #[test]
    fn fractional_seconds() {
        let h = headers(&[("retry-after", "0.5")]);
        assert_eq!(retry_after(&h, now()), Some(Duration::from_millis(500)));
    }

    #[test]
    fn http_date() {
        let h = headers(&[("retry-after", "Wed, 21 Oct 2015 07:28:00 GMT")]);
        assert_eq!(retry_after(&h, now()), Some(Duration::from_secs(60)));
    }

    #[test]
    fn past_date_is_ignored() {
        let h = headers(&[("retry-after", "Wed, 21 Oct 2015 07:00:00 GMT")]);
        assert_eq!(retry_after(&h, now()), None);
    }

    #[test]
    fn huge_values_saturate() {
        let h = headers(&[("retry-after", "1e20")]);
        assert_eq!(retry_after(&h, now()), Some(Duration::MAX));
        let h = headers(&[("retry-after-ms", "1e300")]);
        assert_eq!(retry_after(&h, now()), Some(Duration::MAX));
    }

    #[test]
    fn garbage_is_ignored() {
        let h = headers(&[("retry-after", "soon"), ("retry-after-ms", "-4")]);
        assert_eq!(retry_after(&h, now()), None);
        assert_eq!(retry_after(&headers(&[("x-request-id", "abc")]), now()), None);
    }
}
