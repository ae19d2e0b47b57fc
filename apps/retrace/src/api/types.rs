//! # API Request/Response Types
//!
//! This module defines the JSON structures for the HTTP API.

use retrace_core::{
    CaptureReport, CapturedRequest, CookieStore, InputVariables, LogEntry, NodeId, SessionState,
    Workflow,
};
use serde::{Deserialize, Serialize};

// =============================================================================
// ERROR BODY
// =============================================================================

/// Error payload carrying the wire-visible code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl ErrorBody {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

// =============================================================================
// START SESSION
// =============================================================================

/// Start-session request: the parsed capture plus the target action.
///
/// HAR decoding happens client-side (or in a dedicated importer); the server
/// accepts the normalized request list directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSessionRequest {
    /// Natural-language description of the target action.
    pub prompt: String,
    /// Captured requests in capture order.
    pub requests: Vec<CapturedRequest>,
    /// Optional capture-time cookie state.
    #[serde(default)]
    pub cookies: CookieStore,
    /// Optional declared input variables: name -> example value.
    #[serde(default)]
    pub input_variables: InputVariables,
}

/// Start-session response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSessionResponse {
    pub session_id: String,
    pub state: SessionState,
    pub report: Option<CaptureReport>,
    pub workflows: Vec<Workflow>,
    pub active_workflow_id: Option<String>,
}

// =============================================================================
// SESSION STATUS
// =============================================================================

/// Session status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatusResponse {
    pub session_id: String,
    pub state: SessionState,
    pub prompt: String,
    pub queue_length: usize,
    pub node_count: usize,
    pub edge_count: usize,
    pub unresolved_count: usize,
    pub workflows: Vec<Workflow>,
    pub active_workflow_id: Option<String>,
    pub action_url: Option<String>,
    pub is_complete: bool,
    pub logs: Vec<LogEntry>,
}

// =============================================================================
// WORKFLOW SELECTION
// =============================================================================

/// Select-workflow request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectWorkflowRequest {
    pub workflow_id: String,
}

// =============================================================================
// PROCESSING
// =============================================================================

/// One-tick (or run-loop) response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessResponse {
    pub state: SessionState,
    pub queue_length: usize,
    pub unresolved_count: usize,
    pub is_complete: bool,
}

// =============================================================================
// GRAPH & GENERATION
// =============================================================================

/// Serialized-graph response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphResponse {
    pub session_id: String,
    pub graph: serde_json::Value,
}

/// Code-generation response: the handoff plus the emitted source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub state: SessionState,
    pub action_url: String,
    pub master_node_id: NodeId,
    pub generated_code: String,
}

/// Canonical-export response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportResponse {
    pub success: bool,
    pub data: Option<String>, // Base64 encoded
    pub checksum: Option<u64>,
    pub error: Option<String>,
}

impl ExportResponse {
    pub fn success(data: Vec<u8>, checksum: u64) -> Self {
        Self {
            success: true,
            data: Some(base64::Engine::encode(
                &base64::engine::general_purpose::STANDARD,
                &data,
            )),
            checksum: Some(checksum),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            checksum: None,
            error: Some(msg.into()),
        }
    }
}
