//! # API Endpoint Handlers
//!
//! This module implements the actual HTTP endpoint handlers.
//!
//! Each session is owned by one orchestrator in the registry; handlers lock
//! the registry, translate the HTTP verb into an orchestrator event, and map
//! `RetraceError` codes onto HTTP statuses.

use super::{AppState, now_ms, types::*};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use retrace_core::{
    CaptureInput, HandoffEmitter, InlineCapture, NullOracle, Orchestrator, RetraceError, Session,
    SessionEvent, SessionId, WorkflowId, export_canonical,
};

/// Map a core error onto an HTTP status.
fn status_for(error: &RetraceError) -> StatusCode {
    match error.code() {
        "HAR_EMPTY" | "NO_URLS_AVAILABLE" | "INVALID_TRANSITION" => StatusCode::BAD_REQUEST,
        "NODE_NOT_FOUND" | "URL_NOT_FOUND_IN_HAR" => StatusCode::NOT_FOUND,
        "CIRCULAR_DEPENDENCIES" | "ANALYSIS_INCOMPLETE" => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: &RetraceError) -> (StatusCode, Json<ErrorBody>) {
    (
        status_for(error),
        Json(ErrorBody::new(error.code(), error.to_string())),
    )
}

fn not_found(session_id: &str) -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody::new(
            "SESSION_NOT_FOUND",
            format!("no session {session_id}"),
        )),
    )
}

// =============================================================================
// SESSION CREATION
// =============================================================================

/// `POST /sessions` — start a new analysis session.
///
/// Runs parse → discovery → auto-selection synchronously; the response
/// reports the resulting state and the capture quality summary.
pub async fn create_session_handler(
    State(state): State<AppState>,
    Json(body): Json<StartSessionRequest>,
) -> impl IntoResponse {
    let now = now_ms();
    let session_id = state.next_session_id();
    let session = Session::new(
        SessionId::new(session_id.clone()),
        body.prompt,
        body.input_variables,
        now,
    );
    let input = CaptureInput {
        requests: body.requests,
        cookies: body.cookies,
    };
    let mut orchestrator =
        Orchestrator::new(session, InlineCapture(input), NullOracle, HandoffEmitter);

    let result = orchestrator.handle(SessionEvent::StartSession, now);
    let response = StartSessionResponse {
        session_id: session_id.clone(),
        state: orchestrator.state(),
        report: orchestrator.session().report.clone(),
        workflows: orchestrator.session().workflows.clone(),
        active_workflow_id: orchestrator
            .session()
            .active_workflow_id
            .as_ref()
            .map(|id| id.as_str().to_string()),
    };

    // Failed sessions stay in the registry so their logs remain inspectable
    state
        .sessions
        .write()
        .await
        .insert(session_id.clone(), orchestrator);

    match result {
        Ok(_) => (StatusCode::CREATED, Json(response)).into_response(),
        Err(error) => {
            tracing::warn!(session = %session_id, code = error.code(), "session start failed");
            error_response(&error).into_response()
        }
    }
}

// =============================================================================
// SESSION STATUS
// =============================================================================

/// `GET /sessions/{id}` — session status.
pub async fn session_status_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let sessions = state.sessions.read().await;
    let Some(orchestrator) = sessions.get(&session_id) else {
        return not_found(&session_id).into_response();
    };
    let session = orchestrator.session();

    let response = SessionStatusResponse {
        session_id,
        state: orchestrator.state(),
        prompt: session.prompt.clone(),
        queue_length: session.queue.len(),
        node_count: session.graph.node_count(),
        edge_count: session.graph.edge_count(),
        unresolved_count: session.graph.get_unresolved_nodes().len(),
        workflows: session.workflows.clone(),
        active_workflow_id: session
            .active_workflow_id
            .as_ref()
            .map(|id| id.as_str().to_string()),
        action_url: session.action_url.clone(),
        is_complete: session.is_complete(),
        logs: session.logs.clone(),
    };
    (StatusCode::OK, Json(response)).into_response()
}

// =============================================================================
// WORKFLOW SELECTION
// =============================================================================

/// `POST /sessions/{id}/workflow` — SELECT_WORKFLOW.
pub async fn select_workflow_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<SelectWorkflowRequest>,
) -> impl IntoResponse {
    let mut sessions = state.sessions.write().await;
    let Some(orchestrator) = sessions.get_mut(&session_id) else {
        return not_found(&session_id).into_response();
    };

    match orchestrator.handle(
        SessionEvent::SelectWorkflow {
            workflow_id: WorkflowId::new(body.workflow_id),
        },
        now_ms(),
    ) {
        Ok(_) => process_response(orchestrator).into_response(),
        Err(error) => error_response(&error).into_response(),
    }
}

// =============================================================================
// PROCESSING
// =============================================================================

fn process_response(
    orchestrator: &Orchestrator<InlineCapture, NullOracle, HandoffEmitter>,
) -> (StatusCode, Json<ProcessResponse>) {
    let session = orchestrator.session();
    (
        StatusCode::OK,
        Json(ProcessResponse {
            state: orchestrator.state(),
            queue_length: session.queue.len(),
            unresolved_count: session.graph.get_unresolved_nodes().len(),
            is_complete: session.is_complete(),
        }),
    )
}

/// `POST /sessions/{id}/process` — one PROCESS_NEXT_NODE tick.
pub async fn process_node_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let mut sessions = state.sessions.write().await;
    let Some(orchestrator) = sessions.get_mut(&session_id) else {
        return not_found(&session_id).into_response();
    };

    match orchestrator.handle(SessionEvent::ProcessNextNode, now_ms()) {
        Ok(_) => process_response(orchestrator).into_response(),
        Err(error) => error_response(&error).into_response(),
    }
}

/// `POST /sessions/{id}/run` — drive ticks until ready or failed.
pub async fn run_analysis_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let mut sessions = state.sessions.write().await;
    let Some(orchestrator) = sessions.get_mut(&session_id) else {
        return not_found(&session_id).into_response();
    };

    match orchestrator.run(now_ms()) {
        Ok(_) => process_response(orchestrator).into_response(),
        Err(error) => error_response(&error).into_response(),
    }
}

// =============================================================================
// GRAPH & GENERATION
// =============================================================================

/// `GET /sessions/{id}/graph` — the serialized dependency graph.
pub async fn graph_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let sessions = state.sessions.read().await;
    let Some(orchestrator) = sessions.get(&session_id) else {
        return not_found(&session_id).into_response();
    };

    match orchestrator.session().graph.to_json() {
        Ok(graph) => (
            StatusCode::OK,
            Json(GraphResponse { session_id, graph }),
        )
            .into_response(),
        Err(error) => error_response(&error).into_response(),
    }
}

/// `POST /sessions/{id}/generate` — GENERATE_CODE.
pub async fn generate_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let mut sessions = state.sessions.write().await;
    let Some(orchestrator) = sessions.get_mut(&session_id) else {
        return not_found(&session_id).into_response();
    };

    match orchestrator.handle(SessionEvent::GenerateCode, now_ms()) {
        Ok(state) => {
            let session = orchestrator.session();
            let Some(handoff) = session.handoff.as_ref() else {
                return error_response(&RetraceError::CodeGenerationFailed(
                    "handoff missing after generation".to_string(),
                ))
                .into_response();
            };
            let response = GenerateResponse {
                state,
                action_url: handoff.action_url.clone(),
                master_node_id: handoff.master_node_id,
                generated_code: session.generated_code.clone().unwrap_or_default(),
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(error) => error_response(&error).into_response(),
    }
}

/// `POST /sessions/{id}/export` — canonical export with checksum.
pub async fn export_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let sessions = state.sessions.read().await;
    let Some(orchestrator) = sessions.get(&session_id) else {
        return not_found(&session_id).into_response();
    };
    let graph = &orchestrator.session().graph;

    match export_canonical(graph) {
        Ok(bytes) => {
            let checksum = retrace_core::canonical_checksum(graph);
            (StatusCode::OK, Json(ExportResponse::success(bytes, checksum))).into_response()
        }
        Err(error) => {
            tracing::error!(session = %session_id, "canonical export failed: {error}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ExportResponse::error(error.to_string())),
            )
                .into_response()
        }
    }
}
