//! # Classifier Module
//!
//! Partitions a request's validated dynamic values into the value taxonomy
//! before the resolver runs:
//!
//! - **user input** — equals a declared input example; attached as a named
//!   input and removed from the unresolved set
//! - **auth token** — matched by header/parameter/cookie rules; still needs
//!   a source, so it stays in the residual set
//! - **session constant** — appears in at least the configured number of
//!   requests with no prior response producing it; routed to the bootstrap
//!   search
//! - **dependency** — everything else; routed to the resolver
//!
//! The classifier also derives the request-level authentication analysis,
//! including the public-path shortcut.

use crate::request::CapturedRequest;
use crate::resolver::ResolverConfig;
use crate::types::{ClassifiedParam, InputVariables, ParamKind, ParamOrigin};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

// =============================================================================
// AUTH ANALYSIS
// =============================================================================

/// Authentication scheme observed on a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthScheme {
    /// Public endpoint; no authentication.
    None,
    /// `Authorization: Bearer ...`.
    Bearer,
    /// `Authorization: Basic ...`.
    Basic,
    /// API key in a dedicated header or parameter.
    ApiKey,
    /// Session cookie.
    CookieSession,
    /// Nothing conclusive observed.
    #[default]
    Unknown,
}

/// Whether the endpoint requires authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthRequirement {
    /// Explicitly public.
    None,
    /// A credential was observed on the request.
    Required,
    /// Not determined.
    #[default]
    Unknown,
}

/// Request-level authentication verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuthAnalysis {
    /// The observed scheme.
    pub scheme: AuthScheme,
    /// Whether authentication is required.
    pub requirement: AuthRequirement,
}

impl AuthAnalysis {
    /// Public endpoint: scheme none, requirement none.
    #[must_use]
    pub const fn public() -> Self {
        Self {
            scheme: AuthScheme::None,
            requirement: AuthRequirement::None,
        }
    }
}

/// Path markers identifying explicitly public endpoints.
const PUBLIC_PATH_MARKERS: &[&str] = &["/no-auth/", "/public/", "/anonymous/", "/guest/"];

/// Header name fragments identifying credential headers.
const AUTH_HEADER_MARKERS: &[&str] = &["api-key", "auth-token", "token"];

/// Parameter name fragments identifying credential parameters.
const AUTH_PARAM_MARKERS: &[&str] = &["token", "api", "auth", "key"];

fn auth_cookie_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new("(?i)session|token|auth|csrf|xsrf|jwt").expect("static pattern")
    })
}

/// Whether the request path marks an explicitly public endpoint.
#[must_use]
pub fn is_public_path(request: &CapturedRequest) -> bool {
    let path = request.path();
    PUBLIC_PATH_MARKERS.iter().any(|m| path.contains(m))
}

// =============================================================================
// CLASSIFICATION OUTCOME
// =============================================================================

/// Output of classifying one request's candidate values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    /// Declared inputs found on the request: input name -> matched value.
    pub inputs: BTreeMap<String, String>,
    /// Verdict per candidate value.
    pub params: BTreeMap<String, ClassifiedParam>,
    /// Values routed to the bootstrap search.
    pub session_constants: BTreeSet<String>,
    /// Values still needing a source (auth tokens and dependencies).
    pub residual: BTreeSet<String>,
    /// Request-level authentication verdict.
    pub auth: AuthAnalysis,
}

// =============================================================================
// CLASSIFIER
// =============================================================================

/// Classify a request's candidate values against the session's declared
/// inputs and the whole capture.
///
/// `capture` is the full ordered request list; it backs the session-constant
/// occurrence count and the produced-by-a-prior-response check.
#[must_use]
pub fn classify(
    request: &CapturedRequest,
    candidates: &BTreeSet<String>,
    input_variables: &InputVariables,
    capture: &[CapturedRequest],
    config: &ResolverConfig,
) -> Classification {
    let mut outcome = Classification::default();

    for value in candidates {
        // 1. Declared input: attach by name, drop from the unresolved set.
        if let Some((name, _)) = input_variables.iter().find(|(_, example)| *example == value) {
            outcome.inputs.insert(name.clone(), value.clone());
            outcome.params.insert(
                value.clone(),
                ClassifiedParam::new(ParamKind::UserInput, find_origin(request, value)),
            );
            continue;
        }

        // 2. Authentication token: classified but still resolved to a source.
        if is_auth_value(request, value) {
            outcome.params.insert(
                value.clone(),
                ClassifiedParam::new(ParamKind::AuthToken, find_origin(request, value)),
            );
            outcome.residual.insert(value.clone());
            continue;
        }

        // 3. Session constant: widely used, produced by no prior response.
        let usage = occurrence_count(capture, value);
        if usage >= config.session_constant_threshold && !produced_by_any_response(capture, value)
        {
            outcome.params.insert(
                value.clone(),
                ClassifiedParam::new(ParamKind::SessionConstant, find_origin(request, value)),
            );
            outcome.session_constants.insert(value.clone());
            continue;
        }

        // 4. Cross-request dependency: the resolver's problem.
        outcome.params.insert(
            value.clone(),
            ClassifiedParam::new(ParamKind::Dependency, find_origin(request, value)),
        );
        outcome.residual.insert(value.clone());
    }

    outcome.auth = derive_auth_analysis(request, &outcome);
    outcome
}

/// Number of captured requests whose canonical form carries the value.
#[must_use]
pub fn occurrence_count(capture: &[CapturedRequest], value: &str) -> usize {
    capture
        .iter()
        .filter(|req| req.to_curl().contains(value))
        .count()
}

/// Whether any captured response (body or headers) produces the value.
#[must_use]
pub fn produced_by_any_response(capture: &[CapturedRequest], value: &str) -> bool {
    capture.iter().any(|req| {
        req.response.as_ref().is_some_and(|resp| {
            resp.body_text
                .as_deref()
                .is_some_and(|body| body.contains(value))
                || resp.headers.iter().any(|(_, v)| v.contains(value))
        })
    })
}

// =============================================================================
// AUTH VALUE RULES
// =============================================================================

/// Whether a candidate value is an authentication/session token on this
/// request.
#[must_use]
pub fn is_auth_value(request: &CapturedRequest, value: &str) -> bool {
    for (name, header_value) in &request.headers {
        if !header_value.contains(value) {
            continue;
        }
        if name.eq_ignore_ascii_case("authorization") {
            return true;
        }
        if header_value.starts_with("Bearer ") || header_value.starts_with("Basic ") {
            return true;
        }
        let lowered = name.to_ascii_lowercase();
        if AUTH_HEADER_MARKERS.iter().any(|m| lowered.contains(m)) {
            return true;
        }
        if name.eq_ignore_ascii_case("cookie") {
            // Only the cookies actually carrying the value count
            for pair in header_value.split(';') {
                if let Some((cookie_name, cookie_value)) = pair.trim().split_once('=') {
                    if cookie_value.contains(value)
                        && auth_cookie_pattern().is_match(cookie_name)
                    {
                        return true;
                    }
                }
            }
        }
    }

    for (name, param_value) in &request.query {
        if param_value == value {
            let lowered = name.to_ascii_lowercase();
            if AUTH_PARAM_MARKERS.iter().any(|m| lowered.contains(m)) {
                return true;
            }
        }
    }

    if let Some(body) = request.body_text() {
        if body.contains(value) && body_param_name_matches(body, value) {
            return true;
        }
    }

    false
}

/// Whether the body parameter carrying the value has an auth-like name.
fn body_param_name_matches(body: &str, value: &str) -> bool {
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
        return json_auth_param(&json, value);
    }
    // Form-encoded fallback
    body.split('&').any(|pair| {
        pair.split_once('=').is_some_and(|(name, v)| {
            v == value
                && AUTH_PARAM_MARKERS
                    .iter()
                    .any(|m| name.to_ascii_lowercase().contains(m))
        })
    })
}

fn json_auth_param(json: &serde_json::Value, value: &str) -> bool {
    match json {
        serde_json::Value::Object(map) => map.iter().any(|(name, v)| {
            let name_matches = AUTH_PARAM_MARKERS
                .iter()
                .any(|m| name.to_ascii_lowercase().contains(m));
            match v {
                serde_json::Value::String(s) => (name_matches && s == value)
                    || json_auth_param(v, value),
                _ => json_auth_param(v, value),
            }
        }),
        serde_json::Value::Array(items) => items.iter().any(|v| json_auth_param(v, value)),
        _ => false,
    }
}

fn derive_auth_analysis(request: &CapturedRequest, outcome: &Classification) -> AuthAnalysis {
    if is_public_path(request) {
        return AuthAnalysis::public();
    }

    let has_auth_value = outcome
        .params
        .values()
        .any(|p| p.kind == ParamKind::AuthToken);

    let scheme = match request.header("authorization") {
        Some(v) if v.starts_with("Bearer ") => AuthScheme::Bearer,
        Some(v) if v.starts_with("Basic ") => AuthScheme::Basic,
        Some(_) => AuthScheme::ApiKey,
        None => {
            if request.headers.iter().any(|(name, _)| {
                let lowered = name.to_ascii_lowercase();
                AUTH_HEADER_MARKERS.iter().any(|m| lowered.contains(m))
            }) {
                AuthScheme::ApiKey
            } else if request.header("cookie").is_some_and(|header| {
                header.split(';').any(|pair| {
                    pair.trim()
                        .split_once('=')
                        .is_some_and(|(name, _)| auth_cookie_pattern().is_match(name))
                })
            }) {
                AuthScheme::CookieSession
            } else {
                AuthScheme::Unknown
            }
        }
    };

    let requirement = if has_auth_value || scheme != AuthScheme::Unknown {
        AuthRequirement::Required
    } else {
        AuthRequirement::Unknown
    };

    AuthAnalysis {
        scheme,
        requirement,
    }
}

// =============================================================================
// ORIGIN DETECTION
// =============================================================================

/// Locate where on the request a value was observed.
fn find_origin(request: &CapturedRequest, value: &str) -> ParamOrigin {
    for (name, header_value) in &request.headers {
        if header_value.contains(value) {
            if name.eq_ignore_ascii_case("cookie") {
                return ParamOrigin::Cookie;
            }
            return ParamOrigin::Header;
        }
    }
    if request.query.iter().any(|(_, v)| v.contains(value)) {
        return ParamOrigin::Query;
    }
    if request.body_text().is_some_and(|b| b.contains(value)) {
        return ParamOrigin::Body;
    }
    if request.url.contains(value) {
        return ParamOrigin::Url;
    }
    ParamOrigin::Body
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{CapturedResponse, RequestBody};

    fn config() -> ResolverConfig {
        ResolverConfig::default()
    }

    #[test]
    fn declared_input_is_attached_and_removed_from_residual() {
        let mut req = CapturedRequest::new("GET", "https://api/x/items?q=shoe");
        req.query.push(("q".to_string(), "shoe".to_string()));

        let inputs = InputVariables::from([("search_term".to_string(), "shoe".to_string())]);
        let candidates = BTreeSet::from(["shoe".to_string()]);
        let outcome = classify(&req, &candidates, &inputs, &[req.clone()], &config());

        assert_eq!(outcome.inputs.get("search_term"), Some(&"shoe".to_string()));
        assert!(outcome.residual.is_empty());
        assert_eq!(
            outcome.params.get("shoe").map(|p| p.kind),
            Some(ParamKind::UserInput)
        );
    }

    #[test]
    fn bearer_token_is_classified_auth_and_stays_residual() {
        let mut req = CapturedRequest::new("GET", "https://api/x/items");
        req.headers
            .push(("Authorization".to_string(), "Bearer AAA".to_string()));

        let candidates = BTreeSet::from(["AAA".to_string()]);
        let outcome = classify(
            &req,
            &candidates,
            &InputVariables::new(),
            &[req.clone()],
            &config(),
        );

        assert_eq!(
            outcome.params.get("AAA").map(|p| p.kind),
            Some(ParamKind::AuthToken)
        );
        assert!(outcome.residual.contains("AAA"));
        assert_eq!(outcome.auth.scheme, AuthScheme::Bearer);
        assert_eq!(outcome.auth.requirement, AuthRequirement::Required);
    }

    #[test]
    fn auth_cookie_name_pattern_matches() {
        let mut req = CapturedRequest::new("GET", "https://api/x/items");
        req.headers
            .push(("Cookie".to_string(), "csrf_token=XY12AB; theme=dark".to_string()));

        assert!(is_auth_value(&req, "XY12AB"));
        assert!(!is_auth_value(&req, "dark"));
    }

    #[test]
    fn token_named_query_param_is_auth() {
        let mut req = CapturedRequest::new("GET", "https://api/x/items?access_token=SECRET99");
        req.query
            .push(("access_token".to_string(), "SECRET99".to_string()));

        assert!(is_auth_value(&req, "SECRET99"));
    }

    #[test]
    fn token_named_json_body_param_is_auth() {
        let mut req = CapturedRequest::new("POST", "https://api/x/refresh");
        req.body = Some(RequestBody::Text(
            "{\"refresh_token\":\"RTOK77\"}".to_string(),
        ));

        assert!(is_auth_value(&req, "RTOK77"));
    }

    #[test]
    fn public_path_yields_public_auth() {
        let req = CapturedRequest::new("GET", "https://api.example.com/public/items?q=shoe");
        let outcome = classify(
            &req,
            &BTreeSet::new(),
            &InputVariables::new(),
            &[req.clone()],
            &config(),
        );

        assert_eq!(outcome.auth, AuthAnalysis::public());
    }

    #[test]
    fn widely_used_unproduced_value_is_session_constant() {
        // sessionId=Z9TOKEN appears in 5 requests, produced by no response
        let capture: Vec<CapturedRequest> = (0..5)
            .map(|i| {
                let mut req = CapturedRequest::new(
                    "GET",
                    format!("https://api/x/page{i}?sessionId=Z9TOKEN"),
                );
                req.query
                    .push(("sessionId".to_string(), "Z9TOKEN".to_string()));
                req
            })
            .collect();

        let candidates = BTreeSet::from(["Z9TOKEN".to_string()]);
        let outcome = classify(
            &capture[0],
            &candidates,
            &InputVariables::new(),
            &capture,
            &config(),
        );

        assert!(outcome.session_constants.contains("Z9TOKEN"));
        assert!(!outcome.residual.contains("Z9TOKEN"));
        assert_eq!(
            outcome.params.get("Z9TOKEN").map(|p| p.kind),
            Some(ParamKind::SessionConstant)
        );
    }

    #[test]
    fn produced_value_is_dependency_not_constant() {
        // The value appears in many requests BUT a response produces it
        let mut capture: Vec<CapturedRequest> = (0..4)
            .map(|i| {
                let mut req =
                    CapturedRequest::new("GET", format!("https://api/x/p{i}?ref=DEP42XYZ"));
                req.query.push(("ref".to_string(), "DEP42XYZ".to_string()));
                req
            })
            .collect();
        let mut producer = CapturedRequest::new("GET", "https://api/x/seed");
        producer.response = Some(CapturedResponse::new(
            200,
            "OK",
            vec![],
            Some("{\"ref\":\"DEP42XYZ\"}".to_string()),
        ));
        capture.push(producer);

        let candidates = BTreeSet::from(["DEP42XYZ".to_string()]);
        let outcome = classify(
            &capture[0],
            &candidates,
            &InputVariables::new(),
            &capture,
            &config(),
        );

        assert_eq!(
            outcome.params.get("DEP42XYZ").map(|p| p.kind),
            Some(ParamKind::Dependency)
        );
        assert!(outcome.residual.contains("DEP42XYZ"));
    }

    #[test]
    fn origin_detection_prefers_headers() {
        let mut req = CapturedRequest::new("GET", "https://api/x/items?tok=ABC123");
        req.headers
            .push(("X-Probe".to_string(), "ABC123".to_string()));
        req.query.push(("tok".to_string(), "ABC123".to_string()));

        assert_eq!(find_origin(&req, "ABC123"), ParamOrigin::Header);

        let mut cookie_req = CapturedRequest::new("GET", "https://api/x/items");
        cookie_req
            .headers
            .push(("Cookie".to_string(), "sid=ABC123".to_string()));
        assert_eq!(find_origin(&cookie_req, "ABC123"), ParamOrigin::Cookie);
    }
}
