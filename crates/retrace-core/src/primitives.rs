//! # Innate Primitives
//!
//! Hardcoded runtime constants for the Retrace analysis core.
//!
//! Retrace starts with zero knowledge of the capture but fixed logic.
//! These primitives are compiled into the binary and are immutable at runtime;
//! the only tunable among them is the session-constant threshold, which is
//! surfaced through `ResolverConfig`.

/// Minimum length for a candidate dynamic value.
///
/// Literals shorter than this are never proposed as dynamic parts: they are
/// too ambiguous to search for in prior responses (a 2-character fragment
/// matches almost everything).
pub const MIN_DYNAMIC_VALUE_LENGTH: usize = 3;

/// Common static tokens that are never dynamic values.
///
/// These appear in virtually every HTTP capture and carry no
/// request-specific information.
pub const STATIC_TOKENS: &[&str] = &[
    "application/json",
    "text/html",
    "utf-8",
    "true",
    "false",
    "null",
];

/// Default occurrence threshold for classifying a value as a session constant.
///
/// A value appearing in at least this many requests with no prior response
/// producing it is assumed to originate out-of-band (initial page HTML or a
/// bootstrap cookie). Configurable via `ResolverConfig`.
pub const SESSION_CONSTANT_THRESHOLD: usize = 3;

/// Maximum number of dynamic parts considered per request.
///
/// Bounds the per-node work; requests proposing more candidates than this
/// have the excess silently dropped (and logged).
pub const MAX_DYNAMIC_PARTS_PER_REQUEST: usize = 64;

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum number of captured requests accepted in one session.
///
/// Captures larger than this are rejected to prevent memory exhaustion from
/// malicious or malformed input.
pub const MAX_CAPTURE_REQUESTS: usize = 10_000;

/// Maximum number of response-body bytes searched per provider.
///
/// Bodies longer than this (256 KiB) are searched only up to the limit.
/// All searches must be computationally bounded.
pub const MAX_BODY_SEARCH_BYTES: usize = 262_144;

/// Maximum number of processing ticks for a bounded `run` loop.
///
/// Prevents runaway analysis when a capture keeps yielding new dependency
/// nodes; well above any realistic queue length.
pub const MAX_PROCESSING_TICKS: usize = 10_000;

// =============================================================================
// CAPTURE FILTERING
// =============================================================================

/// Host fragments identifying analytics/tracking traffic.
///
/// Requests to hosts containing one of these markers are excluded from the
/// meaningful-request count and never become dependency providers.
pub const TRACKING_HOST_MARKERS: &[&str] = &[
    "google-analytics.",
    "googletagmanager.",
    "doubleclick.",
    "segment.io",
    "sentry.io",
    "hotjar.",
    "mixpanel.",
    "amplitude.",
    "facebook.",
];

/// Path suffixes identifying browser chrome requests (not user actions).
pub const CHROME_PATH_SUFFIXES: &[&str] = &["/favicon.ico", "/robots.txt"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimum_dynamic_length_is_three() {
        // A literal of length 2 must never be proposed as a dynamic part
        assert_eq!(MIN_DYNAMIC_VALUE_LENGTH, 3);
    }

    #[test]
    fn static_tokens_include_common_media_types() {
        assert!(STATIC_TOKENS.contains(&"application/json"));
        assert!(STATIC_TOKENS.contains(&"text/html"));
        assert!(STATIC_TOKENS.contains(&"null"));
    }
}
