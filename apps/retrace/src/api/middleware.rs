//! # Request Throttling
//!
//! Global request-rate ceiling for the session API.
//!
//! Analysis ticks are CPU-bound and failed sessions stay resident in the
//! registry, so the ceiling applies to the server as a whole rather than per
//! client. `RETRACE_RATE_LIMIT` sets requests per second; `0` disables the
//! ceiling entirely.

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Requests per second when `RETRACE_RATE_LIMIT` is unset or unparseable.
const DEFAULT_RATE_LIMIT: u32 = 100;

// =============================================================================
// LIMITER
// =============================================================================

/// Process-wide limiter handle, shared across all connections.
pub type SharedLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// The configured ceiling, or `None` when throttling is switched off.
pub fn rate_limit_from_env() -> Option<NonZeroU32> {
    let configured = std::env::var("RETRACE_RATE_LIMIT")
        .ok()
        .and_then(|raw| raw.parse::<u32>().ok())
        .unwrap_or(DEFAULT_RATE_LIMIT);
    NonZeroU32::new(configured)
}

/// Build the shared limiter for a ceiling.
pub fn shared_limiter(ceiling: NonZeroU32) -> SharedLimiter {
    Arc::new(RateLimiter::direct(Quota::per_second(ceiling)))
}

// =============================================================================
// MIDDLEWARE
// =============================================================================

/// Throttling middleware: requests over the ceiling get 429 without touching
/// the registry lock.
pub async fn throttle(
    State(limiter): State<SharedLimiter>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, &'static str)> {
    if limiter.check().is_err() {
        tracing::warn!(path = %request.uri().path(), "request over rate ceiling");
        return Err((StatusCode::TOO_MANY_REQUESTS, "Too Many Requests"));
    }
    Ok(next.run(request).await)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceiling_of_one_exhausts_after_first_check() {
        let limiter = shared_limiter(NonZeroU32::MIN);
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_err());
    }

    #[test]
    fn generous_ceiling_allows_a_burst() {
        let ceiling = NonZeroU32::new(50).expect("nonzero");
        let limiter = shared_limiter(ceiling);
        for _ in 0..10 {
            assert!(limiter.check().is_ok());
        }
    }
}
