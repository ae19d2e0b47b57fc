//! # Retrace HTTP Client
//!
//! Thin JSON-over-HTTP client for the Retrace session API, used by the MCP
//! tool router. One entry point ([`RetraceClient::call`]) owns URL assembly,
//! auth, and status mapping; the per-endpoint methods below it are route
//! table only.

use reqwest::Method;
use serde_json::Value;

/// Failures surfaced by the bridge's HTTP layer.
#[derive(Debug)]
pub enum ClientError {
    /// The server could not be reached at all.
    ConnectionFailed(String),
    /// The server rejected our API key (401).
    Unauthorized,
    /// The server throttled the request (429).
    RateLimited,
    /// A 4xx carrying a retrace error body (`{code, message}`).
    AnalysisError(String),
    /// A 5xx from the server.
    ServerError(u16, String),
    /// The response body was not the JSON we expected.
    ParseError(String),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionFailed(detail) => write!(f, "retrace server unreachable: {detail}"),
            Self::Unauthorized => write!(f, "retrace server rejected the API key (401)"),
            Self::RateLimited => write!(f, "retrace server throttled the request (429)"),
            Self::AnalysisError(body) => write!(f, "analysis request failed: {body}"),
            Self::ServerError(status, body) => {
                write!(f, "retrace server error {status}: {body}")
            }
            Self::ParseError(detail) => write!(f, "unexpected response body: {detail}"),
        }
    }
}

impl std::error::Error for ClientError {}

/// HTTP client over the Retrace session API.
#[derive(Clone)]
pub struct RetraceClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl RetraceClient {
    /// Create a client for the given server URL, with optional Bearer auth.
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            api_key,
        }
    }

    /// Issue one API call and map the response.
    ///
    /// Status mapping: 401 and 429 become their dedicated variants, other
    /// 4xx bodies pass through verbatim (they carry the wire-visible error
    /// code), 5xx keeps the status, and anything else must parse as JSON.
    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ClientError> {
        let mut request = self.http.request(method, format!("{}{path}", self.base_url));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        if let Some(body) = &body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ClientError::ConnectionFailed(format!("{}: {e}", self.base_url)))?;

        let status = response.status().as_u16();
        match status {
            401 => Err(ClientError::Unauthorized),
            429 => Err(ClientError::RateLimited),
            400..=499 => Err(ClientError::AnalysisError(
                response.text().await.unwrap_or_default(),
            )),
            500..=599 => Err(ClientError::ServerError(
                status,
                response.text().await.unwrap_or_default(),
            )),
            _ => response
                .json::<Value>()
                .await
                .map_err(|e| ClientError::ParseError(e.to_string())),
        }
    }

    // =========================================================================
    // ROUTE TABLE
    // =========================================================================

    /// POST /sessions → start an analysis session.
    pub async fn start_session(&self, body: Value) -> Result<Value, ClientError> {
        self.call(Method::POST, "/sessions", Some(body)).await
    }

    /// GET /sessions/{id} → session status and logs.
    pub async fn status(&self, session_id: &str) -> Result<Value, ClientError> {
        self.call(Method::GET, &format!("/sessions/{session_id}"), None)
            .await
    }

    /// POST /sessions/{id}/workflow → select the workflow to analyze.
    pub async fn select_workflow(
        &self,
        session_id: &str,
        workflow_id: &str,
    ) -> Result<Value, ClientError> {
        self.call(
            Method::POST,
            &format!("/sessions/{session_id}/workflow"),
            Some(serde_json::json!({ "workflow_id": workflow_id })),
        )
        .await
    }

    /// POST /sessions/{id}/process → one processing tick.
    pub async fn process_node(&self, session_id: &str) -> Result<Value, ClientError> {
        self.call(
            Method::POST,
            &format!("/sessions/{session_id}/process"),
            None,
        )
        .await
    }

    /// POST /sessions/{id}/run → drive processing until ready or failed.
    pub async fn run_analysis(&self, session_id: &str) -> Result<Value, ClientError> {
        self.call(Method::POST, &format!("/sessions/{session_id}/run"), None)
            .await
    }

    /// GET /sessions/{id}/graph → the serialized dependency graph.
    pub async fn graph(&self, session_id: &str) -> Result<Value, ClientError> {
        self.call(Method::GET, &format!("/sessions/{session_id}/graph"), None)
            .await
    }

    /// POST /sessions/{id}/generate → build the codegen handoff.
    pub async fn generate(&self, session_id: &str) -> Result<Value, ClientError> {
        self.call(
            Method::POST,
            &format!("/sessions/{session_id}/generate"),
            None,
        )
        .await
    }
}
