//! Retry delay computation and response sniffing helpers.
//!
//! Every retry in the request executor goes through [`BackoffPolicy::delay`];
//! nothing else in the crate sleeps for backoff on its own.

use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use std::time::Duration;

/// Why a request is about to be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryKind {
    /// Timeout or connection failure.
    Transport,
    /// HTTP 429 without a usable `Retry-After`.
    RateLimited,
    /// Anti-automation status or an HTML page instead of JSON.
    Blocked,
    /// 408/425/5xx.
    Server,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Linear step `k` in `min(k * attempt, cap)`.
    pub step: Duration,
    pub blocked_step: Duration,
    pub transport_cap: Duration,
    pub rate_limit_cap: Duration,
    pub blocked_cap: Duration,
    pub server_cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            step: Duration::from_secs(2),
            blocked_step: Duration::from_secs(15),
            transport_cap: Duration::from_secs(30),
            rate_limit_cap: Duration::from_secs(90),
            blocked_cap: Duration::from_secs(90),
            server_cap: Duration::from_secs(60),
        }
    }
}

impl BackoffPolicy {
    /// Base delay before retrying after `attempt` (1-based) failed with `kind`.
    /// Jitter is added separately by the caller.
    pub fn delay(&self, attempt: u32, kind: RetryKind) -> Duration {
        let (step, cap) = match kind {
            RetryKind::Transport => (self.step, self.transport_cap),
            RetryKind::RateLimited => (self.step, self.rate_limit_cap),
            RetryKind::Blocked => (self.blocked_step, self.blocked_cap),
            RetryKind::Server => (self.step, self.server_cap),
        };
        step.saturating_mul(attempt.max(1)).min(cap)
    }
}

/// Uniform random delay in `[0, max]`.
pub fn jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

/// Obsolete HTTP date forms still allowed in `Retry-After` (RFC 850, asctime).
const LEGACY_HTTP_DATES: [&str; 2] = ["%A, %d-%b-%y %H:%M:%S GMT", "%a %b %e %H:%M:%S %Y"];

/// Parse a `Retry-After` header value: either delta-seconds or an HTTP date.
/// Negative seconds and dates in the past clamp to zero. Unparseable values
/// yield `None`.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(secs) = value.parse::<i64>() {
        return Some(Duration::from_secs(secs.max(0) as u64));
    }
    let at = match DateTime::parse_from_rfc2822(value) {
        Ok(at) => at.with_timezone(&Utc),
        Err(_) => LEGACY_HTTP_DATES
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())?
            .and_utc(),
    };
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

static HTML_START: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*<(!doctype\b|!--|[a-z][a-z0-9-]*[\s>/])").expect("static regex")
});

/// True when the body starts with an HTML tag or doctype, whatever the
/// declared content type says.
pub fn looks_like_html(body: &str) -> bool {
    HTML_START.is_match(body.trim_start_matches('\u{feff}'))
}

/// First `max` characters of `body`, for log lines and error strings.
pub fn snippet(body: &str, max: usize) -> String {
    let mut out: String = body.chars().take(max).collect();
    if body.chars().count() > max {
        out.push('…');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn delay_is_linear_then_capped() {
        let p = BackoffPolicy::default();
        assert_eq!(p.delay(1, RetryKind::Server), Duration::from_secs(2));
        assert_eq!(p.delay(5, RetryKind::Server), Duration::from_secs(10));
        assert_eq!(p.delay(40, RetryKind::Server), Duration::from_secs(60));
        assert_eq!(p.delay(50, RetryKind::RateLimited), Duration::from_secs(90));
        assert_eq!(p.delay(20, RetryKind::Transport), Duration::from_secs(30));
    }

    #[test]
    fn blocked_delay_uses_long_step() {
        let p = BackoffPolicy::default();
        assert_eq!(p.delay(1, RetryKind::Blocked), Duration::from_secs(15));
        assert_eq!(p.delay(3, RetryKind::Blocked), Duration::from_secs(45));
        assert_eq!(p.delay(7, RetryKind::Blocked), Duration::from_secs(90));
    }

    #[test]
    fn attempt_zero_counts_as_first() {
        let p = BackoffPolicy::default();
        assert_eq!(p.delay(0, RetryKind::Server), p.delay(1, RetryKind::Server));
    }

    #[test]
    fn retry_after_seconds() {
        let now = Utc::now();
        assert_eq!(parse_retry_after("7", now), Some(Duration::from_secs(7)));
        assert_eq!(parse_retry_after(" 0 ", now), Some(Duration::ZERO));
        assert_eq!(parse_retry_after("soon", now), None);
        assert_eq!(parse_retry_after("", now), None);
        assert_eq!(parse_retry_after("-5", now), Some(Duration::ZERO));
    }

    #[test]
    fn retry_after_http_date() {
        let now = Utc.with_ymd_and_hms(2015, 10, 21, 7, 27, 30).unwrap();
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT", now),
            Some(Duration::from_secs(30))
        );
        // already passed
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:00:00 GMT", now),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn retry_after_legacy_http_dates() {
        let now = Utc.with_ymd_and_hms(2015, 10, 21, 7, 27, 30).unwrap();
        assert_eq!(
            parse_retry_after("Wednesday, 21-Oct-15 07:28:00 GMT", now),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            parse_retry_after("Wed Oct 21 07:28:10 2015", now),
            Some(Duration::from_secs(40))
        );
    }

    #[test]
    fn html_sniffing() {
        assert!(looks_like_html("<!doctype html><html></html>"));
        assert!(looks_like_html("\n  <!DOCTYPE HTML>"));
        assert!(looks_like_html("<html lang=\"ru\">"));
        assert!(!looks_like_html("{\"products\": []}"));
        assert!(!looks_like_html("[]"));
    }

    #[test]
    fn html_sniffing_accepts_any_leading_tag() {
        assert!(looks_like_html("<div class=\"captcha\">Please verify you are human</div>"));
        assert!(looks_like_html("<iframe src=\"/challenge\"></iframe>"));
        assert!(looks_like_html("<br/>"));
        assert!(looks_like_html("\u{feff}<!DOCTYPE html>"));
        assert!(looks_like_html("<!-- challenge -->"));
        assert!(!looks_like_html("<>"));
        assert!(!looks_like_html("\"<div>\""));
    }

    #[test]
    fn jitter_bounds() {
        assert_eq!(jitter(Duration::ZERO), Duration::ZERO);
        for _ in 0..50 {
            assert!(jitter(Duration::from_millis(20)) <= Duration::from_millis(20));
        }
    }

    #[test]
    fn snippet_truncates_on_chars() {
        assert_eq!(snippet("привет", 3), "при…");
        assert_eq!(snippet("ok", 10), "ok");
    }
}
