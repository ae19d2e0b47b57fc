//! Unit tests for API types serialization/deserialization.

// Allow unwrap and panic in tests - these are standard for test code
#![allow(clippy::unwrap_used, clippy::panic)]

use retrace::api::{
    ErrorBody, ExportResponse, GenerateResponse, ProcessResponse, SelectWorkflowRequest,
    StartSessionRequest,
};
use retrace_core::{NodeId, SessionState};

// =============================================================================
// START SESSION REQUEST TESTS
// =============================================================================

#[test]
fn test_start_session_request_minimal() {
    // Cookies and input variables are optional
    let json = r#"{
        "prompt": "search items",
        "requests": [{
            "method": "GET",
            "url": "https://api.example.com/items",
            "headers": [],
            "query": [],
            "body": null,
            "response": null,
            "started_at_ms": null
        }]
    }"#;
    let request: StartSessionRequest = serde_json::from_str(json).unwrap();

    assert_eq!(request.prompt, "search items");
    assert_eq!(request.requests.len(), 1);
    assert!(request.cookies.is_empty());
    assert!(request.input_variables.is_empty());
}

#[test]
fn test_start_session_request_with_cookies_and_inputs() {
    let json = r#"{
        "prompt": "search items",
        "requests": [],
        "cookies": {"cookies": {"sid": {"value": "abc123"}}},
        "input_variables": {"q": "shoe"}
    }"#;
    let request: StartSessionRequest = serde_json::from_str(json).unwrap();

    assert_eq!(request.cookies.value("sid"), Some("abc123"));
    assert_eq!(request.input_variables.get("q"), Some(&"shoe".to_string()));
}

#[test]
fn test_start_session_request_body_variants() {
    let json = r#"{
        "prompt": "submit form",
        "requests": [{
            "method": "POST",
            "url": "https://api.example.com/login",
            "headers": [["Content-Type", "application/json"]],
            "query": [],
            "body": {"text": "{\"user\":\"alice\"}"},
            "response": null,
            "started_at_ms": 1700000000000
        }]
    }"#;
    let request: StartSessionRequest = serde_json::from_str(json).unwrap();

    let captured = &request.requests[0];
    assert_eq!(captured.body_text(), Some("{\"user\":\"alice\"}"));
    assert_eq!(captured.started_at_ms, Some(1_700_000_000_000));
}

// =============================================================================
// STATE WIRE NAMES
// =============================================================================

#[test]
fn test_session_state_wire_names() {
    assert_eq!(
        serde_json::to_string(&SessionState::ProcessingDependencies).unwrap(),
        "\"processingDependencies\""
    );
    assert_eq!(
        serde_json::to_string(&SessionState::ReadyForCodeGen).unwrap(),
        "\"readyForCodeGen\""
    );
    assert_eq!(
        serde_json::to_string(&SessionState::CodeGenerated).unwrap(),
        "\"codeGenerated\""
    );

    let state: SessionState = serde_json::from_str("\"awaitingWorkflowSelection\"").unwrap();
    assert_eq!(state, SessionState::AwaitingWorkflowSelection);
}

// =============================================================================
// RESPONSE TYPES
// =============================================================================

#[test]
fn test_process_response_serialization() {
    let response = ProcessResponse {
        state: SessionState::ProcessingDependencies,
        queue_length: 2,
        unresolved_count: 1,
        is_complete: false,
    };
    let json = serde_json::to_string(&response).unwrap();

    assert!(json.contains("\"state\":\"processingDependencies\""));
    assert!(json.contains("\"queue_length\":2"));
    assert!(json.contains("\"is_complete\":false"));
}

#[test]
fn test_generate_response_round_trip() {
    let response = GenerateResponse {
        state: SessionState::CodeGenerated,
        action_url: "https://api.example.com/items".to_string(),
        master_node_id: NodeId(0),
        generated_code: "{}".to_string(),
    };
    let json = serde_json::to_string(&response).unwrap();
    let restored: GenerateResponse = serde_json::from_str(&json).unwrap();

    assert_eq!(restored.master_node_id, NodeId(0));
    assert_eq!(restored.action_url, response.action_url);
}

#[test]
fn test_select_workflow_request() {
    let request: SelectWorkflowRequest =
        serde_json::from_str(r#"{"workflow_id": "wf-search"}"#).unwrap();
    assert_eq!(request.workflow_id, "wf-search");
}

// =============================================================================
// ERROR BODY TESTS
// =============================================================================

#[test]
fn test_error_body_carries_wire_code() {
    let error = ErrorBody::new("HAR_EMPTY", "Capture contains no meaningful requests");
    let json = serde_json::to_string(&error).unwrap();

    assert!(json.contains("\"code\":\"HAR_EMPTY\""));
    assert!(json.contains("meaningful requests"));
}

// =============================================================================
// EXPORT RESPONSE TESTS
// =============================================================================

#[test]
fn test_export_response_success_encodes_base64() {
    let response = ExportResponse::success(vec![1, 2, 3, 4], 42);

    assert!(response.success);
    assert_eq!(response.checksum, Some(42));
    let data = response.data.unwrap();
    let decoded =
        base64::Engine::decode(&base64::engine::general_purpose::STANDARD, data).unwrap();
    assert_eq!(decoded, vec![1, 2, 3, 4]);
}

#[test]
fn test_export_response_error() {
    let response = ExportResponse::error("boom");

    assert!(!response.success);
    assert!(response.data.is_none());
    assert_eq!(response.error.as_deref(), Some("boom"));
}
