//! # API Key Gate
//!
//! Bearer-token gate for the session API.
//!
//! Sessions carry captured credentials (auth headers, cookies, tokens), so
//! any deployment reachable beyond localhost should set `RETRACE_API_KEY`.
//! With the variable unset the gate stays open and the router logs a warning
//! at startup.

use axum::{
    body::Body,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

// =============================================================================
// KEY HANDLING
// =============================================================================

/// The configured API key. An empty value counts as unset.
pub fn api_key_from_env() -> Option<String> {
    std::env::var("RETRACE_API_KEY")
        .ok()
        .filter(|key| !key.is_empty())
}

/// The key presented by a request, as an owned string.
///
/// Accepts `Authorization: Bearer <key>` and a bare `Authorization: <key>`.
fn presented_key(request: &Request<Body>) -> Option<String> {
    let raw = request
        .headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?;
    Some(raw.strip_prefix("Bearer ").unwrap_or(raw).to_string())
}

/// Constant-time key comparison.
///
/// The XOR accumulator walks the configured key, so the amount of work never
/// depends on what the caller sent; out-of-range positions contribute a
/// guaranteed mismatch, and the length check goes through `subtle` instead
/// of short-circuiting.
fn keys_match(presented: &str, expected: &str) -> bool {
    let presented = presented.as_bytes();
    let expected = expected.as_bytes();

    let mut diff: u8 = 0;
    for (index, &expected_byte) in expected.iter().enumerate() {
        let presented_byte = presented.get(index).copied().unwrap_or(!expected_byte);
        diff |= presented_byte ^ expected_byte;
    }

    let lengths_equal: bool = (presented.len() as u64)
        .ct_eq(&(expected.len() as u64))
        .into();
    let bytes_equal: bool = diff.ct_eq(&0).into();
    lengths_equal && bytes_equal
}

// =============================================================================
// MIDDLEWARE
// =============================================================================

/// Session-API authentication middleware.
///
/// No configured key: every request passes. Configured key: the request must
/// present it or is turned away with 401 before reaching any handler.
pub async fn require_api_key(
    request: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, &'static str)> {
    let Some(expected) = api_key_from_env() else {
        return Ok(next.run(request).await);
    };

    match presented_key(&request) {
        Some(key) if keys_match(&key, &expected) => Ok(next.run(request).await),
        Some(_) => {
            tracing::warn!(path = %request.uri().path(), "rejected request: wrong API key");
            Err((StatusCode::UNAUTHORIZED, "Unauthorized"))
        }
        None => {
            tracing::warn!(
                path = %request.uri().path(),
                "rejected request: no Authorization header"
            );
            Err((StatusCode::UNAUTHORIZED, "Unauthorized"))
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_keys_pass() {
        assert!(keys_match("top-secret", "top-secret"));
    }

    #[test]
    fn wrong_truncated_or_padded_keys_fail() {
        assert!(!keys_match("top-secreX", "top-secret"));
        assert!(!keys_match("top", "top-secret"));
        assert!(!keys_match("top-secret-and-more", "top-secret"));
        assert!(!keys_match("", "top-secret"));
    }

    #[test]
    fn unset_env_means_open_gate() {
        // SAFETY: runs isolated from the env-driven API tests, which hold a
        // mutex around this variable.
        unsafe { std::env::remove_var("RETRACE_API_KEY") };
        assert!(api_key_from_env().is_none());
    }
}
