//! # Bootstrap Source Search
//!
//! Session constants have no prior-response producer by definition; their
//! origin is out-of-band. This module locates that origin:
//!
//! 1. the earliest captured HTML pages, scanned with an ordered family of
//!    extraction regexes (`initial-page-html`)
//! 2. `Set-Cookie` headers observed on those pages (`initial-page-cookie`)
//! 3. failing both, a **synthetic** source attached to the origin of the
//!    earliest request using the literal, provided the literal is used
//!    widely enough
//!
//! Every source carries an extraction pattern the code generator can run
//! against a freshly fetched page.

use crate::capture::parse_set_cookie;
use crate::request::CapturedRequest;
use crate::resolver::ResolverConfig;
use regex::Regex;
use serde::{Deserialize, Serialize};

// =============================================================================
// SOURCE RECORD
// =============================================================================

/// Bootstrap source subtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BootstrapSubtype {
    /// The value is embedded in the initial page HTML.
    InitialPageHtml,
    /// The value arrives in a `Set-Cookie` on the initial page.
    InitialPageCookie,
}

impl BootstrapSubtype {
    /// Wire name of the subtype.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InitialPageHtml => "initial-page-html",
            Self::InitialPageCookie => "initial-page-cookie",
        }
    }
}

/// A located bootstrap source for one literal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapSource {
    /// The literal this source supplies.
    pub literal: String,
    /// Source subtype.
    pub subtype: BootstrapSubtype,
    /// Capture index of the page request, when the source is a real page.
    pub provider_index: Option<usize>,
    /// Origin the source attaches to.
    pub origin: String,
    /// Extraction regex; its first capture group yields the value.
    pub extraction_pattern: String,
    /// True when no real page produced the value and the source is inferred.
    pub synthetic: bool,
}

// =============================================================================
// EXTRACTION PATTERN FAMILIES
// =============================================================================

/// Ordered pattern families tried against initial-page HTML.
///
/// `{}` is replaced with the escaped literal wrapped in a capture group.
const PATTERN_FAMILIES: &[&str] = &[
    // variable declarations: var x = "V" / let / const
    r#"(?:var|let|const)\s+[A-Za-z_$][\w$]*\s*=\s*["']({})["']"#,
    // window/global assignments
    r#"(?:window|globalThis|self)\.[A-Za-z_$][\w$]*\s*=\s*["']({})["']"#,
    // JSON property: "name":"V"
    r#""[^"]+"\s*:\s*"({})""#,
    // data attributes (kebab-cased)
    r#"data-[a-z0-9\-]+=["']({})["']"#,
    // meta tag name/content
    r#"<meta[^>]+name=["'][^"']+["'][^>]+content=["']({})["']"#,
    // hidden form inputs
    r#"<input[^>]+type=["']hidden["'][^>]*value=["']({})["']"#,
];

/// First pattern family matching the literal inside the HTML.
///
/// Falls back to a plain escaped-literal pattern when the literal is present
/// but fits no structured family. Returns `None` when the HTML does not
/// contain the literal at all.
#[must_use]
pub fn extraction_pattern(html: &str, literal: &str) -> Option<String> {
    if !html.contains(literal) {
        return None;
    }
    let escaped = regex::escape(literal);
    for family in PATTERN_FAMILIES {
        let pattern = family.replace("{}", &escaped);
        if Regex::new(&pattern).is_ok_and(|re| re.is_match(html)) {
            return Some(pattern);
        }
    }
    Some(format!("({escaped})"))
}

// =============================================================================
// SEARCH
// =============================================================================

/// Whether a captured request fetched an HTML page.
fn is_html_page(request: &CapturedRequest) -> bool {
    request
        .response
        .as_ref()
        .and_then(|r| r.content_type())
        .is_some_and(|ct| ct.contains("text/html"))
}

/// Locate a bootstrap source for a literal.
///
/// `capture` is the full ordered request list. Pages are scanned earliest
/// first; the synthetic fallback requires the literal to appear in at least
/// `config.session_constant_threshold` requests.
#[must_use]
pub fn find_bootstrap_source(
    literal: &str,
    capture: &[CapturedRequest],
    config: &ResolverConfig,
) -> Option<BootstrapSource> {
    // 1. Initial-page HTML bodies
    for (index, request) in capture.iter().enumerate() {
        if !is_html_page(request) {
            continue;
        }
        let Some(body) = request
            .response
            .as_ref()
            .and_then(|r| r.body_text.as_deref())
        else {
            continue;
        };
        if let Some(pattern) = extraction_pattern(body, literal) {
            return Some(BootstrapSource {
                literal: literal.to_string(),
                subtype: BootstrapSubtype::InitialPageHtml,
                provider_index: Some(index),
                origin: request.origin().to_string(),
                extraction_pattern: pattern,
                synthetic: false,
            });
        }
    }

    // 2. Set-Cookie on initial HTML pages
    for (index, request) in capture.iter().enumerate() {
        if !is_html_page(request) {
            continue;
        }
        let Some(response) = &request.response else {
            continue;
        };
        for header_value in response.header_all("set-cookie") {
            if let Some(parsed) = parse_set_cookie(header_value) {
                if parsed.value.contains(literal) {
                    return Some(BootstrapSource {
                        literal: literal.to_string(),
                        subtype: BootstrapSubtype::InitialPageCookie,
                        provider_index: Some(index),
                        origin: request.origin().to_string(),
                        extraction_pattern: format!("{}=([^;]+)", regex::escape(&parsed.name)),
                        synthetic: false,
                    });
                }
            }
        }
    }

    // 3. Synthetic source for widely used literals
    let users: Vec<&CapturedRequest> = capture
        .iter()
        .filter(|req| req.to_curl().contains(literal))
        .collect();
    if users.len() >= config.session_constant_threshold {
        let earliest = users[0];
        return Some(BootstrapSource {
            literal: literal.to_string(),
            subtype: BootstrapSubtype::InitialPageHtml,
            provider_index: None,
            origin: earliest.origin().to_string(),
            extraction_pattern: format!("({})", regex::escape(literal)),
            synthetic: true,
        });
    }

    None
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::CapturedResponse;

    fn html_page(url: &str, body: &str) -> CapturedRequest {
        let mut req = CapturedRequest::new("GET", url);
        req.response = Some(CapturedResponse::new(
            200,
            "OK",
            vec![(
                "Content-Type".to_string(),
                "text/html; charset=utf-8".to_string(),
            )],
            Some(body.to_string()),
        ));
        req
    }

    #[test]
    fn variable_declaration_family_wins() {
        let html = r#"<script>var sessionKey = "K9XY12";</script>"#;
        let pattern = extraction_pattern(html, "K9XY12").expect("pattern");
        assert!(pattern.contains("var|let|const"));

        let re = Regex::new(&pattern).expect("compile");
        let captured = re
            .captures(html)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str());
        assert_eq!(captured, Some("K9XY12"));
    }

    #[test]
    fn json_property_family_matches() {
        let html = r#"<script>window.__STATE__ = {"csrf":"TOK55AB"};</script>"#;
        let pattern = extraction_pattern(html, "TOK55AB").expect("pattern");
        assert!(pattern.contains("[^\"]+"));
    }

    #[test]
    fn hidden_input_family_matches() {
        let html = r#"<form><input type="hidden" name="csrf" value="HID77"></form>"#;
        let pattern = extraction_pattern(html, "HID77").expect("pattern");
        let re = Regex::new(&pattern).expect("compile");
        assert!(re.is_match(html));
    }

    #[test]
    fn literal_fallback_when_no_family_fits() {
        let html = "raw text mentioning PLAIN42 inline";
        let pattern = extraction_pattern(html, "PLAIN42").expect("pattern");
        assert_eq!(pattern, "(PLAIN42)");
    }

    #[test]
    fn absent_literal_yields_no_pattern() {
        assert!(extraction_pattern("<html></html>", "GHOST").is_none());
    }

    #[test]
    fn initial_page_html_source_is_found() {
        let capture = vec![
            html_page(
                "https://app.example.com/",
                r#"<script>var sid = "Z9TOKEN";</script>"#,
            ),
            CapturedRequest::new("GET", "https://app.example.com/api/items?sid=Z9TOKEN"),
        ];

        let source =
            find_bootstrap_source("Z9TOKEN", &capture, &ResolverConfig::default()).expect("source");
        assert_eq!(source.subtype, BootstrapSubtype::InitialPageHtml);
        assert_eq!(source.provider_index, Some(0));
        assert!(!source.synthetic);
        assert_eq!(source.origin, "https://app.example.com");
    }

    #[test]
    fn initial_page_cookie_source_is_found() {
        let mut page = html_page("https://app.example.com/", "<html><body/></html>");
        if let Some(resp) = page.response.as_mut() {
            resp.headers.push((
                "Set-Cookie".to_string(),
                "bootSid=Z9TOKEN; Path=/; HttpOnly".to_string(),
            ));
        }
        let capture = vec![page];

        let source =
            find_bootstrap_source("Z9TOKEN", &capture, &ResolverConfig::default()).expect("source");
        assert_eq!(source.subtype, BootstrapSubtype::InitialPageCookie);
        assert_eq!(source.extraction_pattern, "bootSid=([^;]+)");
    }

    #[test]
    fn synthetic_source_for_widely_used_literal() {
        // No initial HTML in the capture; five requests share sessionId=Z9
        let capture: Vec<CapturedRequest> = (0..5)
            .map(|i| {
                CapturedRequest::new(
                    "GET",
                    format!("https://api.example.com/x/p{i}?sessionId=Z9TOKEN"),
                )
            })
            .collect();

        let source =
            find_bootstrap_source("Z9TOKEN", &capture, &ResolverConfig::default()).expect("source");
        assert!(source.synthetic);
        assert_eq!(source.subtype, BootstrapSubtype::InitialPageHtml);
        assert_eq!(source.provider_index, None);
        assert_eq!(source.origin, "https://api.example.com");
    }

    #[test]
    fn rarely_used_literal_has_no_source() {
        let capture = vec![CapturedRequest::new(
            "GET",
            "https://api.example.com/x?once=RARE11",
        )];
        assert!(find_bootstrap_source("RARE11", &capture, &ResolverConfig::default()).is_none());
    }
}
