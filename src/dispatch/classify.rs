use reqwest::StatusCode;
use reqwest::header::HeaderMap;

/// Cooldown applied when the upstream rate-limits without naming a wait.
const DEFAULT_RETRY_AFTER_MS: i64 = 60_000;

/// What the dispatch engine should do with an upstream response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Hand the response back to the host (success or non-retryable error).
    Return,
    /// Try the next endpoint with the same account.
    FallbackEndpoint,
    /// Cool this account down and move to the next one.
    CooldownAccount { retry_after_ms: i64 },
}

/// Classify an upstream response from status and headers alone.
///
/// A 429 rotates accounts only when rotation can actually help (pool of two
/// or more); a lone account falls back through the remaining endpoints
/// instead. 403/404/5xx are endpoint problems, not account problems.
pub fn classify(
    status: StatusCode,
    headers: &HeaderMap,
    pool_size: usize,
    endpoints_remaining: usize,
) -> Disposition {
    let fallback_or_return = || {
        if endpoints_remaining > 0 {
            Disposition::FallbackEndpoint
        } else {
            Disposition::Return
        }
    };

    match status {
        StatusCode::TOO_MANY_REQUESTS => {
            if pool_size >= 2 {
                Disposition::CooldownAccount {
                    retry_after_ms: retry_after_ms(headers),
                }
            } else {
                fallback_or_return()
            }
        }
        StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => fallback_or_return(),
        s if s.is_server_error() => fallback_or_return(),
        _ => Disposition::Return,
    }
}

/// Cooldown length for a rate-limited response.
///
/// `retry-after-ms` (integer milliseconds, > 0) wins; else `retry-after`
/// (integer seconds) × 1000; absent or malformed values fall back to 60 s.
pub fn retry_after_ms(headers: &HeaderMap) -> i64 {
    let parse = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
    };

    if let Some(ms) = parse("retry-after-ms").filter(|ms| *ms > 0) {
        return ms;
    }
    if let Some(secs) = parse("retry-after").filter(|secs| *secs >= 0) {
        return secs.saturating_mul(1000);
    }
    DEFAULT_RETRY_AFTER_MS
}
