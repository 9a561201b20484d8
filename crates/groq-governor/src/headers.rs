//! Rate limit header parsing
//!
//! Turns a provider response's headers into a complete `QuotaInfo`. Never
//! fails: a missing, malformed or zero value falls back to the configured
//! default so the breaker and strategy selector always see well-formed
//! numbers, even from a non-conforming or header-less response.

use quota_store::{QuotaDefaults, QuotaInfo};
use reqwest::header::HeaderMap;

pub const LIMIT_REQUESTS: &str = "x-ratelimit-limit-requests";
pub const REMAINING_REQUESTS: &str = "x-ratelimit-remaining-requests";
pub const RESET_REQUESTS: &str = "x-ratelimit-reset-requests";
pub const LIMIT_TOKENS: &str = "x-ratelimit-limit-tokens";
pub const REMAINING_TOKENS: &str = "x-ratelimit-remaining-tokens";
pub const RESET_TOKENS: &str = "x-ratelimit-reset-tokens";
pub const RETRY_AFTER: &str = "retry-after";

/// Parse the rate limit headers of one response.
///
/// - Limits: missing/invalid/zero → the default limit
/// - Remaining: missing/invalid → the effective limit; clamped to it
/// - Reset markers and retry-after: passed through trimmed, blank → `None`
pub fn parse_rate_limit_headers(headers: &HeaderMap, defaults: QuotaDefaults) -> QuotaInfo {
    let requests_limit = header_u64(headers, LIMIT_REQUESTS)
        .filter(|v| *v > 0)
        .unwrap_or(defaults.requests_per_day.max(1));
    let requests_remaining = header_u64(headers, REMAINING_REQUESTS)
        .unwrap_or(requests_limit)
        .min(requests_limit);

    let tokens_limit = header_u64(headers, LIMIT_TOKENS)
        .filter(|v| *v > 0)
        .unwrap_or(defaults.tokens_per_minute.max(1));
    let tokens_remaining = header_u64(headers, REMAINING_TOKENS)
        .unwrap_or(tokens_limit)
        .min(tokens_limit);

    QuotaInfo {
        requests_limit,
        requests_remaining,
        requests_reset: header_str(headers, RESET_REQUESTS),
        tokens_limit,
        tokens_remaining,
        tokens_reset: header_str(headers, RESET_TOKENS),
        retry_after: header_str(headers, RETRY_AFTER),
    }
}

/// Interpret `retry-after` as delay seconds, rounding fractions up.
///
/// HTTP-date values and anything else non-numeric yield `None`; the caller
/// applies its own default.
pub fn retry_after_secs(info: &QuotaInfo) -> Option<u64> {
    let raw = info.retry_after.as_deref()?;
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(secs);
    }
    let secs = raw.parse::<f64>().ok()?;
    if secs.is_finite() && secs >= 0.0 {
        Some(secs.ceil() as u64)
    } else {
        None
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    let value = headers.get(name)?.to_str().ok()?.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}
