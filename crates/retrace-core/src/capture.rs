//! # Capture Module
//!
//! The captured-session inputs: cookie store and capture quality assessment.
//!
//! HAR and cookie *file* decoding happens outside the core; the orchestrator
//! receives an already parsed [`CaptureInput`] through the [`CaptureSource`]
//! collaborator trait. What lives here is the part the pipeline owns:
//! - the cookie store (read-only after session start)
//! - `Set-Cookie` header parsing
//! - the meaningful-request filter and the validation summary

use crate::primitives::{CHROME_PATH_SUFFIXES, MAX_CAPTURE_REQUESTS, TRACKING_HOST_MARKERS};
use crate::request::CapturedRequest;
use crate::types::RetraceError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// COOKIE STORE
// =============================================================================

/// A single cookie as captured from the browser.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CookieRecord {
    /// The captured value.
    pub value: String,
    /// Cookie domain, when recorded.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub domain: Option<String>,
    /// Cookie path, when recorded.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub path: Option<String>,
    /// Attribute flags (`HttpOnly`, `Secure`, ...) in capture order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[serde(default)]
    pub flags: Vec<String>,
}

impl CookieRecord {
    /// Create a record holding only a value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            ..Self::default()
        }
    }
}

/// Mapping `name -> (value, domain?, path?, flags)`.
///
/// Read-only after session start; the resolver consults it before any
/// request provider.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CookieStore {
    cookies: BTreeMap<String, CookieRecord>,
}

impl CookieStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a cookie.
    pub fn insert(&mut self, name: impl Into<String>, record: CookieRecord) {
        self.cookies.insert(name.into(), record);
    }

    /// Lookup a cookie by exact name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&CookieRecord> {
        self.cookies.get(name)
    }

    /// The captured value of a cookie, by exact name.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(|r| r.value.as_str())
    }

    /// First cookie whose captured value contains the literal.
    ///
    /// Iteration order is name order, so the match is deterministic.
    #[must_use]
    pub fn find_containing(&self, literal: &str) -> Option<(&str, &CookieRecord)> {
        self.cookies
            .iter()
            .find(|(_, record)| record.value.contains(literal))
            .map(|(name, record)| (name.as_str(), record))
    }

    /// Iterate cookies in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CookieRecord)> {
        self.cookies.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of cookies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }
}

// =============================================================================
// SET-COOKIE PARSING
// =============================================================================

/// A parsed `Set-Cookie` header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCookie {
    /// Cookie name.
    pub name: String,
    /// Cookie value.
    pub value: String,
    /// Attribute triples `(name, optional value)` in header order.
    pub attributes: Vec<(String, Option<String>)>,
}

/// Parse a `Set-Cookie` header value into name/value/attribute triples.
///
/// Returns `None` for malformed values with no `name=value` head.
#[must_use]
pub fn parse_set_cookie(header_value: &str) -> Option<SetCookie> {
    let mut parts = header_value.split(';');
    let head = parts.next()?.trim();
    let eq = head.find('=')?;
    let (name, value) = head.split_at(eq);
    if name.is_empty() {
        return None;
    }

    let attributes = parts
        .map(|attr| {
            let attr = attr.trim();
            match attr.split_once('=') {
                Some((k, v)) => (k.trim().to_string(), Some(v.trim().to_string())),
                None => (attr.to_string(), None),
            }
        })
        .collect();

    Some(SetCookie {
        name: name.trim().to_string(),
        value: value[1..].trim().to_string(),
        attributes,
    })
}

// =============================================================================
// CAPTURE INPUT & SOURCE
// =============================================================================

/// Parsed capture handed to the orchestrator at session start.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CaptureInput {
    /// Captured requests in capture order.
    pub requests: Vec<CapturedRequest>,
    /// Cookie state at capture time.
    #[serde(default)]
    pub cookies: CookieStore,
}

/// External collaborator that supplies the parsed capture.
///
/// HAR and cookie files are decoded outside the core; implementors perform
/// the I/O and hand back a [`CaptureInput`]. This is the only suspension
/// point of the `parsingHar` state.
pub trait CaptureSource {
    /// Load and decode the capture.
    fn load(&self) -> Result<CaptureInput, RetraceError>;
}

/// Trivial source wrapping an already materialized capture.
#[derive(Debug, Clone)]
pub struct InlineCapture(pub CaptureInput);

impl CaptureSource for InlineCapture {
    fn load(&self) -> Result<CaptureInput, RetraceError> {
        Ok(self.0.clone())
    }
}

// =============================================================================
// CAPTURE VALIDATION
// =============================================================================

/// Overall capture quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureQuality {
    /// Enough meaningful traffic to analyze.
    Good,
    /// Analyzable but thin or noisy; accepted with a logged warning.
    Poor,
    /// No meaningful requests; the session is rejected with `HAR_EMPTY`.
    Empty,
}

/// Validation summary for a capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureReport {
    /// Overall quality verdict.
    pub quality: CaptureQuality,
    /// Requests that count as user-action traffic.
    pub meaningful_request_count: usize,
    /// All captured requests.
    pub total_request_count: usize,
    /// Problems found during validation.
    pub issues: Vec<String>,
    /// Suggestions for producing a better capture.
    pub recommendations: Vec<String>,
}

/// Whether a captured request counts as meaningful user-action traffic.
///
/// Excludes `OPTIONS` preflights, browser chrome (favicon, robots) and
/// obvious analytics/tracking hosts.
#[must_use]
pub fn is_meaningful(request: &CapturedRequest) -> bool {
    if request.method.eq_ignore_ascii_case("OPTIONS") {
        return false;
    }
    let path = request.path();
    if CHROME_PATH_SUFFIXES.iter().any(|s| path.ends_with(s)) {
        return false;
    }
    let origin = request.origin();
    if TRACKING_HOST_MARKERS.iter().any(|m| origin.contains(m)) {
        return false;
    }
    true
}

/// Compute the validation summary for a parsed capture.
#[must_use]
pub fn validate_capture(requests: &[CapturedRequest]) -> CaptureReport {
    let total = requests.len();
    let meaningful = requests.iter().filter(|r| is_meaningful(r)).count();
    let with_response = requests
        .iter()
        .filter(|r| is_meaningful(r) && r.response.is_some())
        .count();

    let mut issues = Vec::new();
    let mut recommendations = Vec::new();

    if total == 0 {
        issues.push("capture contains no requests".to_string());
    } else if meaningful == 0 {
        issues.push(format!(
            "all {total} captured requests are preflight, chrome or tracking traffic"
        ));
    }
    if total > MAX_CAPTURE_REQUESTS {
        issues.push(format!(
            "capture has {total} requests, exceeding the {MAX_CAPTURE_REQUESTS} limit"
        ));
    }
    if meaningful > 0 && with_response < meaningful {
        issues.push(format!(
            "{} meaningful requests have no captured response",
            meaningful - with_response
        ));
        recommendations
            .push("re-capture with response bodies enabled in the recorder".to_string());
    }
    if meaningful > 0 && meaningful < 3 {
        issues.push(format!("only {meaningful} meaningful requests captured"));
        recommendations.push(
            "perform the full user action during capture, including the page load".to_string(),
        );
    }
    if total > 0 && meaningful.saturating_mul(2) < total {
        recommendations.push(
            "filter analytics/tracking domains in the recorder to reduce noise".to_string(),
        );
    }

    let quality = if meaningful == 0 || total > MAX_CAPTURE_REQUESTS {
        CaptureQuality::Empty
    } else if meaningful < 3 || with_response < meaningful {
        CaptureQuality::Poor
    } else {
        CaptureQuality::Good
    };

    CaptureReport {
        quality,
        meaningful_request_count: meaningful,
        total_request_count: total,
        issues,
        recommendations,
    }
}

// =============================================================================
// TESTS
// =============================================================================
