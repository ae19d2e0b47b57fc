//! # Request Model
//!
//! Normalized view of a single captured request/response pair.
//!
//! The model is the unit the whole pipeline works on:
//! - canonical curl-equivalent string (search haystack + identity heuristic)
//! - case-insensitive header lookup, query lookup
//! - content classification (`is_javascript_or_html` excludes script/markup
//!   requests as dependency providers)
//! - response JSON parsed lazily on first access

use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

// =============================================================================
// BODY
// =============================================================================

/// Captured request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestBody {
    /// UTF-8 text body (JSON, form-encoded, plain text).
    Text(String),
    /// Opaque binary body.
    Binary(Vec<u8>),
}

impl RequestBody {
    /// Body length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(s) => s.len(),
            Self::Binary(b) => b.len(),
        }
    }

    /// Whether the body is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Text view of the body, if it is textual.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Binary(_) => None,
        }
    }

    /// Bytes view of the body.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(s) => s.as_bytes(),
            Self::Binary(b) => b,
        }
    }
}

/// Coarse request-body classification used by the simplicity scorer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    /// No body at all.
    None,
    /// `application/json`.
    Json,
    /// `application/x-www-form-urlencoded`.
    Form,
    /// `multipart/*`.
    Multipart,
    /// Anything else.
    Other,
}

// =============================================================================
// RESPONSE
// =============================================================================

/// Captured response for a request.
///
/// The body is kept as text; JSON is parsed lazily on first access and
/// cached for the lifetime of the capture.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CapturedResponse {
    /// HTTP status code.
    pub status: u16,
    /// Status text as captured.
    pub status_text: String,
    /// Response headers in capture order.
    pub headers: Vec<(String, String)>,
    /// Response body text, when textual.
    pub body_text: Option<String>,
    /// Lazily parsed JSON view of `body_text`.
    #[serde(skip)]
    body_json: OnceLock<Option<serde_json::Value>>,
}

impl Clone for CapturedResponse {
    fn clone(&self) -> Self {
        // The JSON cache is cheap to rebuild; clones start cold.
        Self {
            status: self.status,
            status_text: self.status_text.clone(),
            headers: self.headers.clone(),
            body_text: self.body_text.clone(),
            body_json: OnceLock::new(),
        }
    }
}

impl PartialEq for CapturedResponse {
    fn eq(&self, other: &Self) -> bool {
        self.status == other.status
            && self.status_text == other.status_text
            && self.headers == other.headers
            && self.body_text == other.body_text
    }
}

impl CapturedResponse {
    /// Create a response with status, headers and optional text body.
    #[must_use]
    pub fn new(
        status: u16,
        status_text: impl Into<String>,
        headers: Vec<(String, String)>,
        body_text: Option<String>,
    ) -> Self {
        Self {
            status,
            status_text: status_text.into(),
            headers,
            body_text,
            body_json: OnceLock::new(),
        }
    }

    /// Case-insensitive response header lookup.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values of a response header (e.g. repeated `Set-Cookie`).
    pub fn header_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The response content type, if declared.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Parsed JSON body. Parsed once on first access, cached thereafter.
    #[must_use]
    pub fn body_json(&self) -> Option<&serde_json::Value> {
        self.body_json
            .get_or_init(|| {
                self.body_text
                    .as_deref()
                    .and_then(|t| serde_json::from_str(t).ok())
            })
            .as_ref()
    }
}

// =============================================================================
// REQUEST IDENTITY
// =============================================================================

/// Identity key for deduplicating captured requests.
///
/// Two requests are the same node iff `(method, url, body hash)` match.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestIdentity {
    /// Upper-cased HTTP method.
    pub method: String,
    /// Full URL including query string.
    pub url: String,
    /// FNV-1a hash of the body bytes (0 when there is no body).
    pub body_hash: u64,
}

/// FNV-1a 64-bit hash. Deterministic across platforms and runs.
#[must_use]
pub fn fnv1a64(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

// =============================================================================
// CAPTURED REQUEST
// =============================================================================

/// A single captured request/response pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedRequest {
    /// HTTP method as captured.
    pub method: String,
    /// Full URL including query string.
    pub url: String,
    /// Request headers in capture order.
    pub headers: Vec<(String, String)>,
    /// Decomposed query parameters in capture order.
    pub query: Vec<(String, String)>,
    /// Optional request body.
    pub body: Option<RequestBody>,
    /// Response, when one was captured.
    pub response: Option<CapturedResponse>,
    /// Capture timestamp in epoch milliseconds, when known.
    pub started_at_ms: Option<u64>,
}

impl Default for CapturedRequest {
    fn default() -> Self {
        Self::new("GET", "")
    }
}

impl CapturedRequest {
    /// Create a bare request with method and URL.
    #[must_use]
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: Vec::new(),
            query: Vec::new(),
            body: None,
            response: None,
            started_at_ms: None,
        }
    }

    // =========================================================================
    // LOOKUPS
    // =========================================================================

    /// Case-insensitive request header lookup.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Query parameter lookup (exact name).
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Text view of the request body, if textual.
    #[must_use]
    pub fn body_text(&self) -> Option<&str> {
        self.body.as_ref().and_then(RequestBody::as_text)
    }

    /// Body size in bytes (0 when there is no body).
    #[must_use]
    pub fn body_len(&self) -> usize {
        self.body.as_ref().map_or(0, RequestBody::len)
    }

    /// Coarse body classification from the declared content type.
    #[must_use]
    pub fn body_kind(&self) -> BodyKind {
        if self.body.is_none() {
            return BodyKind::None;
        }
        match self.header("content-type") {
            Some(ct) if ct.contains("application/json") => BodyKind::Json,
            Some(ct) if ct.contains("application/x-www-form-urlencoded") => BodyKind::Form,
            Some(ct) if ct.contains("multipart/") => BodyKind::Multipart,
            _ => BodyKind::Other,
        }
    }

    // =========================================================================
    // URL DERIVATIONS
    // =========================================================================

    /// The URL with its query string stripped.
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.url.split('?').next().unwrap_or(&self.url)
    }

    /// The scheme+host part of the URL, e.g. `https://api.example.com`.
    #[must_use]
    pub fn origin(&self) -> &str {
        url_origin(&self.url)
    }

    /// The URL path, without query string.
    #[must_use]
    pub fn path(&self) -> &str {
        url_path(&self.url)
    }

    /// Non-empty path segments.
    #[must_use]
    pub fn path_segments(&self) -> Vec<&str> {
        self.path().split('/').filter(|s| !s.is_empty()).collect()
    }

    // =========================================================================
    // CANONICAL FORM & IDENTITY
    // =========================================================================

    /// Canonical curl-equivalent string.
    ///
    /// Used both as the search haystack for literal values and as a cheap
    /// identity heuristic.
    #[must_use]
    pub fn to_curl(&self) -> String {
        let mut out = format!("curl -X {} '{}'", self.method.to_ascii_uppercase(), self.url);
        for (name, value) in &self.headers {
            out.push_str(&format!(" -H '{name}: {value}'"));
        }
        match &self.body {
            Some(RequestBody::Text(text)) => out.push_str(&format!(" --data '{text}'")),
            Some(RequestBody::Binary(bytes)) => {
                out.push_str(&format!(" --data-binary '<{} bytes>'", bytes.len()));
            }
            None => {}
        }
        out
    }

    /// Identity key: `(method, url, body hash)`.
    #[must_use]
    pub fn identity(&self) -> RequestIdentity {
        RequestIdentity {
            method: self.method.to_ascii_uppercase(),
            url: self.url.clone(),
            body_hash: self
                .body
                .as_ref()
                .map_or(0, |b| fnv1a64(b.as_bytes())),
        }
    }

    /// Whether two captured requests denote the same node.
    #[must_use]
    pub fn same_identity(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }

    // =========================================================================
    // CONTENT CLASSIFICATION
    // =========================================================================

    /// Whether this request fetches JavaScript or HTML.
    ///
    /// Such requests are never dependency providers: their payloads are
    /// program text or markup, not API state.
    #[must_use]
    pub fn is_javascript_or_html(&self) -> bool {
        if self.path().ends_with(".js") {
            return true;
        }
        self.response
            .as_ref()
            .and_then(CapturedResponse::content_type)
            .is_some_and(|ct| ct.contains("text/html") || ct.contains("application/javascript"))
    }
}

// =============================================================================
// URL HELPERS
// =============================================================================

/// The scheme+host part of a URL (up to, not including, the path).
#[must_use]
pub fn url_origin(url: &str) -> &str {
    let after_scheme = match url.find("://") {
        Some(idx) => idx + 3,
        None => return url.split(['/', '?']).next().unwrap_or(url),
    };
    match url[after_scheme..].find(['/', '?']) {
        Some(idx) => &url[..after_scheme + idx],
        None => url,
    }
}

/// The path component of a URL, without query string.
#[must_use]
pub fn url_path(url: &str) -> &str {
    let without_query = url.split('?').next().unwrap_or(url);
    let after_scheme = match without_query.find("://") {
        Some(idx) => idx + 3,
        None => 0,
    };
    match without_query[after_scheme..].find('/') {
        Some(idx) => &without_query[after_scheme + idx..],
        None => "",
    }
}

/// Percent-decode a URL-encoded string. Invalid escapes pass through verbatim.
#[must_use]
pub fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Some(Ok(b)) = input
                .get(i + 1..i + 3)
                .map(|hex| u8::from_str_radix(hex, 16))
            {
                out.push(b);
                i += 3;
                continue;
            }
        }
        if bytes[i] == b'+' {
            out.push(b' ');
        } else {
            out.push(bytes[i]);
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with_response(url: &str, content_type: &str) -> CapturedRequest {
        let mut req = CapturedRequest::new("GET", url);
        req.response = Some(CapturedResponse::new(
            200,
            "OK",
            vec![("Content-Type".to_string(), content_type.to_string())],
            Some("{}".to_string()),
        ));
        req
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut req = CapturedRequest::new("GET", "https://api.example.com/items");
        req.headers
            .push(("Authorization".to_string(), "Bearer abc".to_string()));

        assert_eq!(req.header("authorization"), Some("Bearer abc"));
        assert_eq!(req.header("AUTHORIZATION"), Some("Bearer abc"));
        assert_eq!(req.header("x-missing"), None);
    }

    #[test]
    fn base_url_strips_query() {
        let req = CapturedRequest::new("GET", "https://api.example.com/items?q=shoe&page=2");
        assert_eq!(req.base_url(), "https://api.example.com/items");
    }

    #[test]
    fn origin_and_path() {
        let req = CapturedRequest::new("GET", "https://api.example.com:8443/v1/items?q=1");
        assert_eq!(req.origin(), "https://api.example.com:8443");
        assert_eq!(req.path(), "/v1/items");
        assert_eq!(req.path_segments(), vec!["v1", "items"]);
    }

    #[test]
    fn identity_matches_on_method_url_body() {
        let mut a = CapturedRequest::new("post", "https://api/x/login");
        a.body = Some(RequestBody::Text("{\"u\":1}".to_string()));
        let mut b = CapturedRequest::new("POST", "https://api/x/login");
        b.body = Some(RequestBody::Text("{\"u\":1}".to_string()));
        let mut c = CapturedRequest::new("POST", "https://api/x/login");
        c.body = Some(RequestBody::Text("{\"u\":2}".to_string()));

        assert!(a.same_identity(&b));
        assert!(!a.same_identity(&c));
    }

    #[test]
    fn curl_string_contains_method_url_headers_body() {
        let mut req = CapturedRequest::new("post", "https://api/x/login");
        req.headers
            .push(("Content-Type".to_string(), "application/json".to_string()));
        req.body = Some(RequestBody::Text("{\"user\":\"alice\"}".to_string()));

        let curl = req.to_curl();
        assert!(curl.starts_with("curl -X POST 'https://api/x/login'"));
        assert!(curl.contains("-H 'Content-Type: application/json'"));
        assert!(curl.contains("--data '{\"user\":\"alice\"}'"));
    }

    #[test]
    fn js_url_is_excluded_as_provider() {
        let req = CapturedRequest::new("GET", "https://cdn.example.com/app.js?v=3");
        assert!(req.is_javascript_or_html());
    }

    #[test]
    fn html_response_is_excluded_as_provider() {
        let req = request_with_response("https://example.com/", "text/html; charset=utf-8");
        assert!(req.is_javascript_or_html());

        let json = request_with_response("https://example.com/api", "application/json");
        assert!(!json.is_javascript_or_html());
    }

    #[test]
    fn response_json_parses_lazily() {
        let mut req = CapturedRequest::new("GET", "https://api/x/items");
        req.response = Some(CapturedResponse::new(
            200,
            "OK",
            vec![],
            Some("{\"token\":\"AAA\"}".to_string()),
        ));

        let resp = req.response.as_ref().expect("response");
        let json = resp.body_json().expect("json");
        assert_eq!(json["token"], "AAA");
        // Second access hits the cache and yields the same value
        assert_eq!(resp.body_json().expect("json")["token"], "AAA");
    }

    #[test]
    fn percent_decode_handles_escapes() {
        assert_eq!(percent_decode("a%20b"), "a b");
        assert_eq!(percent_decode("x%3Dy"), "x=y");
        assert_eq!(percent_decode("plus+sign"), "plus sign");
        // Invalid escape passes through
        assert_eq!(percent_decode("bad%zz"), "bad%zz");
    }

    #[test]
    fn body_kind_classification() {
        let mut req = CapturedRequest::new("POST", "https://api/x");
        assert_eq!(req.body_kind(), BodyKind::None);

        req.headers
            .push(("Content-Type".to_string(), "application/json".to_string()));
        req.body = Some(RequestBody::Text("{}".to_string()));
        assert_eq!(req.body_kind(), BodyKind::Json);
    }

    #[test]
    fn fnv_hash_is_stable() {
        // Known FNV-1a vector: empty input hashes to the offset basis
        assert_eq!(fnv1a64(b""), 0xcbf2_9ce4_8422_2325);
        assert_ne!(fnv1a64(b"a"), fnv1a64(b"b"));
    }
}
