use crate::cache::TieredCache;
use crate::errors::AppError;

/// Redis-backed fixed-window rate limiter for the public validate endpoint.
///
/// The endpoint is unauthenticated and callable from arbitrary third-party
/// pages, so it gets a per-client budget. Increments an atomic Redis counter
/// keyed on the client and returns an error once the window budget is spent.
/// A limit of 0 disables enforcement.
pub async fn check_validate_rate_limit(
    client_key: &str,
    max_requests: u64,
    window_secs: u64,
    cache: &TieredCache,
) -> Result<(), AppError> {
    if max_requests == 0 {
        return Ok(());
    }

    let key = format!("rate:validate:{}:{}", client_key, window_secs);
    let count = cache
        .increment(&key, window_secs)
        .await
        .map_err(AppError::Internal)?;

    if count > max_requests {
        tracing::warn!(
            client = client_key,
            limit = max_requests,
            count,
            "validate endpoint rate limit exceeded"
        );
        return Err(AppError::RateLimitExceeded);
    }

    Ok(())
}

/// Derive the counter key for a validate call. Prefer the source IP; fall
/// back to a prefix of the presented token so a missing peer address does
/// not collapse every caller into one bucket.
pub fn client_key(source_ip: Option<&str>, token: &str) -> String {
    match source_ip {
        Some(ip) if !ip.is_empty() => format!("ip:{}", ip),
        _ => {
            let prefix: String = token.chars().take(16).collect();
            format!("tok:{}", prefix)
        }
    }
}
