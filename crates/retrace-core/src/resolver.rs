//! # Resolver Module
//!
//! Given a consumer request and a set of unknown literal values, find the
//! cheapest source for each.
//!
//! Precedence, checked in order across the whole capture:
//! 1. the cookie store
//! 2. prior response bodies (JSON-aware)
//! 3. prior response headers, including parsed `Set-Cookie`
//!
//! A provider must *produce* the literal: a request whose own canonical form
//! carries the literal is consumer-side and rejected. JavaScript/HTML
//! requests are never providers. When several providers match, the
//! deterministic simplicity score picks the winner; ties break by capture
//! order.

use crate::capture::{CookieStore, parse_set_cookie};
use crate::primitives::{MAX_BODY_SEARCH_BYTES, SESSION_CONSTANT_THRESHOLD};
use crate::request::{BodyKind, CapturedRequest, percent_decode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Tunables for resolution and classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Occurrences required before a value counts as a session constant.
    pub session_constant_threshold: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            session_constant_threshold: SESSION_CONSTANT_THRESHOLD,
        }
    }
}

// =============================================================================
// RESOLUTION RESULTS
// =============================================================================

/// Where inside the provider the literal was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchLocation {
    /// In the response body.
    ResponseBody,
    /// In a plain response header.
    ResponseHeader,
    /// In a parsed `Set-Cookie` value.
    SetCookie,
}

/// The source resolving one literal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ResolutionSource {
    /// A cookie from the capture-time store.
    Cookie {
        /// Cookie name.
        name: String,
    },
    /// A prior captured request.
    PriorRequest {
        /// Index into the capture's request list.
        index: usize,
        /// Where the literal appeared.
        location: MatchLocation,
    },
    /// No source found; the orchestrator may still try the bootstrap search.
    NotFound,
}

/// Resolution verdict for one literal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// The literal being resolved.
    pub literal: String,
    /// Its source.
    pub source: ResolutionSource,
}

// =============================================================================
// RESOLVE
// =============================================================================

/// Resolve a set of literals for a consumer request.
///
/// `consumer_index` is the consumer's position in the capture when known;
/// only strictly earlier requests are considered as providers. Literals are
/// processed in sorted order, so the output is deterministic.
#[must_use]
pub fn resolve_values(
    consumer: &CapturedRequest,
    literals: &BTreeSet<String>,
    cookies: &CookieStore,
    capture: &[CapturedRequest],
    consumer_index: Option<usize>,
) -> Vec<Resolution> {
    literals
        .iter()
        .map(|literal| Resolution {
            literal: literal.clone(),
            source: resolve_one(consumer, literal, cookies, capture, consumer_index),
        })
        .collect()
}

fn resolve_one(
    consumer: &CapturedRequest,
    literal: &str,
    cookies: &CookieStore,
    capture: &[CapturedRequest],
    consumer_index: Option<usize>,
) -> ResolutionSource {
    // 1. Cookie store
    if let Some((name, _)) = cookies.find_containing(literal) {
        return ResolutionSource::Cookie {
            name: name.to_string(),
        };
    }

    let limit = consumer_index.unwrap_or(capture.len()).min(capture.len());
    let eligible: Vec<usize> = (0..limit)
        .filter(|&i| is_eligible_provider(&capture[i], consumer, literal))
        .collect();

    // 2. Prior response bodies
    let body_matches: Vec<usize> = eligible
        .iter()
        .copied()
        .filter(|&i| response_body_contains(&capture[i], literal))
        .collect();
    if let Some(index) = pick_simplest(&body_matches, capture) {
        return ResolutionSource::PriorRequest {
            index,
            location: MatchLocation::ResponseBody,
        };
    }

    // 3. Response headers, including Set-Cookie
    let header_matches: Vec<(usize, MatchLocation)> = eligible
        .iter()
        .copied()
        .filter_map(|i| response_headers_contain(&capture[i], literal).map(|loc| (i, loc)))
        .collect();
    let header_indices: Vec<usize> = header_matches.iter().map(|(i, _)| *i).collect();
    if let Some(index) = pick_simplest(&header_indices, capture) {
        let location = header_matches
            .iter()
            .find(|(i, _)| *i == index)
            .map_or(MatchLocation::ResponseHeader, |(_, loc)| *loc);
        return ResolutionSource::PriorRequest { index, location };
    }

    ResolutionSource::NotFound
}

/// Provider eligibility: has a response, is not script/markup, is not the
/// consumer itself, and does not carry the literal in its own request.
fn is_eligible_provider(
    provider: &CapturedRequest,
    consumer: &CapturedRequest,
    literal: &str,
) -> bool {
    if provider.response.is_none() {
        return false;
    }
    if provider.is_javascript_or_html() {
        return false;
    }
    if provider.same_identity(consumer) {
        return false;
    }
    // Consumer-side test: a request that itself sends the literal does not
    // produce it.
    if provider.to_curl().contains(literal) {
        return false;
    }
    true
}

// =============================================================================
// SEARCH
// =============================================================================

/// Whether a provider's response body contains the literal (or its
/// URL-decoded variant). JSON bodies are searched structurally.
#[must_use]
pub fn response_body_contains(provider: &CapturedRequest, literal: &str) -> bool {
    let Some(response) = &provider.response else {
        return false;
    };

    let decoded = percent_decode(literal);
    let variants: [&str; 2] = [literal, decoded.as_str()];

    if let Some(json) = response.body_json() {
        return variants
            .iter()
            .any(|needle| json_contains(json, needle));
    }

    response.body_text.as_deref().is_some_and(|text| {
        let bounded = text.get(..MAX_BODY_SEARCH_BYTES).unwrap_or(text);
        variants
            .iter()
            .any(|needle| !needle.is_empty() && bounded.contains(needle))
    })
}

/// Whether a provider's response headers contain the literal.
///
/// `Set-Cookie` values are parsed into name/value/attribute triples and
/// searched; other headers match on substring.
#[must_use]
pub fn response_headers_contain(
    provider: &CapturedRequest,
    literal: &str,
) -> Option<MatchLocation> {
    let response = provider.response.as_ref()?;
    let decoded = percent_decode(literal);

    for (name, value) in &response.headers {
        if name.eq_ignore_ascii_case("set-cookie") {
            if let Some(parsed) = parse_set_cookie(value) {
                if parsed.value.contains(literal) || parsed.value.contains(decoded.as_str()) {
                    return Some(MatchLocation::SetCookie);
                }
            }
        } else if value.contains(literal) || value.contains(decoded.as_str()) {
            return Some(MatchLocation::ResponseHeader);
        }
    }
    None
}

/// Recursive JSON search.
///
/// Strings match on case-insensitive substring or exact equality; numbers
/// and booleans match on their exact string form.
#[must_use]
pub fn json_contains(value: &serde_json::Value, literal: &str) -> bool {
    match value {
        serde_json::Value::String(s) => {
            s == literal || s.to_lowercase().contains(&literal.to_lowercase())
        }
        serde_json::Value::Number(n) => n.to_string() == literal,
        serde_json::Value::Bool(b) => b.to_string() == literal,
        serde_json::Value::Array(items) => items.iter().any(|v| json_contains(v, literal)),
        serde_json::Value::Object(map) => map.values().any(|v| json_contains(v, literal)),
        serde_json::Value::Null => false,
    }
}

// =============================================================================
// SIMPLICITY SCORING
// =============================================================================

/// Score a candidate provider by how cheap it is to call.
///
/// Higher is simpler. The table is fixed; ties between equal-scoring
/// providers break by capture order in [`pick_simplest`]. Floor at 1.
#[must_use]
pub fn simplicity_score(request: &CapturedRequest) -> i64 {
    let mut score: i64 = 100;

    score += match request.method.to_ascii_uppercase().as_str() {
        "GET" => 20,
        "HEAD" => 15,
        "POST" => 10,
        "PUT" | "PATCH" => 5,
        "DELETE" => 3,
        _ => 0,
    };

    score -= 2 * request.headers.len() as i64;

    score += match request.body_len() {
        0 if request.body.is_none() => 10,
        0..=100 => 0,
        101..=500 => -5,
        501..=1000 => -10,
        _ => -20,
    };

    score -= 3 * request.path_segments().len() as i64;
    score -= 4 * request.query.len() as i64;

    score += match request.body_kind() {
        BodyKind::Json => 5,
        BodyKind::Form => 3,
        BodyKind::Multipart => -5,
        BodyKind::None | BodyKind::Other => 0,
    };
    if let Some(ct) = request
        .response
        .as_ref()
        .and_then(|r| r.content_type())
    {
        if ct.contains("application/json") {
            score += 8;
        } else if ct.contains("text/plain") {
            score += 5;
        } else if ct.contains("text/html") {
            score -= 3;
        }
    }

    let has_auth_header = ["authorization", "x-api-key", "x-auth-token"]
        .iter()
        .any(|name| request.header(name).is_some());
    if has_auth_header {
        score -= 8;
    }

    let path = request.path();
    let segments = request.path_segments();
    if path == "/health" || path == "/status" || path == "/ping" {
        score += 15;
    } else if segments.first() == Some(&"api") && segments.len() <= 3 {
        score += 5;
    }

    score.max(1)
}

/// Among candidate indices, the simplest provider; ties break by the lowest
/// index (insertion order).
#[must_use]
pub fn pick_simplest(indices: &[usize], capture: &[CapturedRequest]) -> Option<usize> {
    indices
        .iter()
        .copied()
        .max_by(|&a, &b| {
            simplicity_score(&capture[a])
                .cmp(&simplicity_score(&capture[b]))
                // On equal score the earlier capture index wins
                .then(b.cmp(&a))
        })
}

// =============================================================================
// TESTS
// =============================================================================
