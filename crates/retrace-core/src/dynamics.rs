//! # Dynamic-Value Identification
//!
//! For each request, produce the set of literal string fragments that are
//! likely to vary across invocations (opaque tokens, request-specific
//! identifiers).
//!
//! The oracle proposes candidates when available; this module is the
//! deterministic rule the pipeline always falls back to, plus the validation
//! gate every candidate passes through regardless of where it came from.
//! Invalid candidates are silently filtered (logged, never errors).

use crate::primitives::{MAX_DYNAMIC_PARTS_PER_REQUEST, MIN_DYNAMIC_VALUE_LENGTH, STATIC_TOKENS};
use crate::request::CapturedRequest;
use std::collections::BTreeSet;

// =============================================================================
// VALIDATION
// =============================================================================

/// A candidate rejected by validation, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedPart {
    /// The rejected candidate.
    pub value: String,
    /// Why it was dropped.
    pub reason: &'static str,
}

/// Outcome of validating a candidate set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidatedParts {
    /// Candidates that survived validation.
    pub accepted: BTreeSet<String>,
    /// Candidates dropped, for the session log.
    pub rejected: Vec<RejectedPart>,
}

/// Whether a candidate is a plausible dynamic literal.
///
/// Rejects candidates that are too short, known static tokens, or not
/// printable text (no alphanumeric character, or control characters).
#[must_use]
pub fn is_valid_dynamic_part(value: &str) -> bool {
    validate_one(value).is_none()
}

fn validate_one(value: &str) -> Option<&'static str> {
    if value.len() < MIN_DYNAMIC_VALUE_LENGTH {
        return Some("shorter than minimum length");
    }
    if STATIC_TOKENS
        .iter()
        .any(|t| t.eq_ignore_ascii_case(value))
    {
        return Some("known static token");
    }
    if !value.chars().any(|c| c.is_alphanumeric()) {
        return Some("no alphanumeric content");
    }
    if value.chars().any(char::is_control) {
        return Some("contains control characters");
    }
    None
}

/// Validate a candidate set, splitting it into accepted and rejected parts.
///
/// Candidates beyond [`MAX_DYNAMIC_PARTS_PER_REQUEST`] are dropped with a
/// bound-exceeded reason; everything here is deterministic (candidates are
/// processed in sorted order).
#[must_use]
pub fn validate_dynamic_parts(candidates: &BTreeSet<String>) -> ValidatedParts {
    let mut outcome = ValidatedParts::default();
    for value in candidates {
        if outcome.accepted.len() >= MAX_DYNAMIC_PARTS_PER_REQUEST {
            outcome.rejected.push(RejectedPart {
                value: value.clone(),
                reason: "per-request candidate bound exceeded",
            });
            continue;
        }
        match validate_one(value) {
            None => {
                outcome.accepted.insert(value.clone());
            }
            Some(reason) => outcome.rejected.push(RejectedPart {
                value: value.clone(),
                reason,
            }),
        }
    }
    outcome
}

// =============================================================================
// RULE-BASED IDENTIFICATION (oracle fallback)
// =============================================================================

/// Deterministic dynamic-part identification.
///
/// Proposes every header/query/body value that is not a known static
/// constant, is at least [`MIN_DYNAMIC_VALUE_LENGTH`] long, and appears as an
/// exact literal in the canonical curl form. Auth-scheme prefixes are
/// stripped (`Bearer AAA` proposes `AAA`), `Cookie` headers are split into
/// per-cookie values, and JSON bodies are walked down to their leaves.
#[must_use]
pub fn identify_dynamic_parts(request: &CapturedRequest) -> BTreeSet<String> {
    let haystack = request.to_curl();
    let mut candidates = BTreeSet::new();
    let mut propose = |value: &str| {
        let value = value.trim();
        if is_valid_dynamic_part(value) && haystack.contains(value) {
            candidates.insert(value.to_string());
        }
    };

    for (name, value) in &request.headers {
        if name.eq_ignore_ascii_case("cookie") {
            for pair in value.split(';') {
                if let Some((_, cookie_value)) = pair.trim().split_once('=') {
                    propose(cookie_value);
                }
            }
            continue;
        }
        if let Some(token) = value
            .strip_prefix("Bearer ")
            .or_else(|| value.strip_prefix("Basic "))
        {
            propose(token);
            continue;
        }
        propose(value);
    }

    for (_, value) in &request.query {
        propose(value);
    }

    match request.body_text() {
        Some(text) => {
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(text) {
                collect_json_leaves(&json, &mut propose);
            } else if looks_form_encoded(text) {
                for pair in text.split('&') {
                    if let Some((_, v)) = pair.split_once('=') {
                        propose(v);
                    }
                }
            }
        }
        None => {}
    }

    candidates
}

fn looks_form_encoded(text: &str) -> bool {
    text.contains('=') && !text.trim_start().starts_with(['{', '['])
}

fn collect_json_leaves(value: &serde_json::Value, propose: &mut impl FnMut(&str)) {
    match value {
        serde_json::Value::String(s) => propose(s),
        serde_json::Value::Number(n) => propose(&n.to_string()),
        serde_json::Value::Array(items) => {
            for item in items {
                collect_json_leaves(item, propose);
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values() {
                collect_json_leaves(item, propose);
            }
        }
        _ => {}
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestBody;

    #[test]
    fn two_char_literal_is_never_proposed() {
        let candidates = BTreeSet::from(["ab".to_string(), "abc".to_string()]);
        let outcome = validate_dynamic_parts(&candidates);

        assert!(!outcome.accepted.contains("ab"));
        assert!(outcome.accepted.contains("abc"));
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(outcome.rejected[0].value, "ab");
    }

    #[test]
    fn static_tokens_are_dropped() {
        let candidates = BTreeSet::from([
            "application/json".to_string(),
            "TRUE".to_string(),
            "xyz789".to_string(),
        ]);
        let outcome = validate_dynamic_parts(&candidates);

        assert_eq!(outcome.accepted, BTreeSet::from(["xyz789".to_string()]));
        assert_eq!(outcome.rejected.len(), 2);
    }

    #[test]
    fn non_printable_values_are_dropped() {
        assert!(!is_valid_dynamic_part("----"));
        assert!(!is_valid_dynamic_part("a\x00b"));
        assert!(is_valid_dynamic_part("tok-3"));
    }

    #[test]
    fn bearer_token_is_proposed_without_scheme() {
        let mut req = CapturedRequest::new("GET", "https://api/x/items");
        req.headers
            .push(("Authorization".to_string(), "Bearer AAA123".to_string()));

        let parts = identify_dynamic_parts(&req);
        assert!(parts.contains("AAA123"));
        assert!(!parts.contains("Bearer AAA123"));
    }

    #[test]
    fn cookie_header_values_are_split() {
        let mut req = CapturedRequest::new("GET", "https://api/x/items");
        req.headers.push((
            "Cookie".to_string(),
            "sid=Z9TOKEN; theme=dark-mode".to_string(),
        ));

        let parts = identify_dynamic_parts(&req);
        assert!(parts.contains("Z9TOKEN"));
        assert!(parts.contains("dark-mode"));
        assert!(!parts.contains("sid=Z9TOKEN"));
    }

    #[test]
    fn json_body_leaves_are_proposed() {
        let mut req = CapturedRequest::new("POST", "https://api/x/login");
        req.headers
            .push(("Content-Type".to_string(), "application/json".to_string()));
        req.body = Some(RequestBody::Text(
            "{\"user\":\"alice99\",\"nested\":{\"token\":\"deadbeef\"}}".to_string(),
        ));

        let parts = identify_dynamic_parts(&req);
        assert!(parts.contains("alice99"));
        assert!(parts.contains("deadbeef"));
    }

    #[test]
    fn form_body_values_are_proposed() {
        let mut req = CapturedRequest::new("POST", "https://api/x/login");
        req.body = Some(RequestBody::Text("user=alice99&pass=hunter22".to_string()));

        let parts = identify_dynamic_parts(&req);
        assert!(parts.contains("alice99"));
        assert!(parts.contains("hunter22"));
    }

    #[test]
    fn query_values_are_proposed() {
        let mut req = CapturedRequest::new("GET", "https://api/x/items?q=shoe&session=Z9TOKEN");
        req.query.push(("q".to_string(), "shoe".to_string()));
        req.query
            .push(("session".to_string(), "Z9TOKEN".to_string()));

        let parts = identify_dynamic_parts(&req);
        assert!(parts.contains("Z9TOKEN"));
        assert!(parts.contains("shoe"));
    }

    #[test]
    fn static_header_values_are_not_proposed() {
        let mut req = CapturedRequest::new("GET", "https://api/x/items");
        req.headers
            .push(("Accept".to_string(), "application/json".to_string()));

        let parts = identify_dynamic_parts(&req);
        assert!(!parts.contains("application/json"));
    }
}
