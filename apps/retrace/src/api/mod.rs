//! # Retrace HTTP API Module
//!
//! This module implements the HTTP REST API server using axum.
//!
//! ## Endpoints
//!
//! - `POST /sessions` - Start an analysis session (parsed capture in body)
//! - `GET  /sessions/{id}` - Session status and logs
//! - `POST /sessions/{id}/workflow` - Select the workflow to analyze
//! - `POST /sessions/{id}/process` - Process one node from the queue
//! - `POST /sessions/{id}/run` - Drive processing until ready or failed
//! - `GET  /sessions/{id}/graph` - Serialized dependency graph
//! - `POST /sessions/{id}/generate` - Build the codegen handoff
//! - `POST /sessions/{id}/export` - Canonical export with checksum
//!
//! ## Environment
//!
//! Captures hold live credentials, so the hardening knobs matter even for a
//! single-user deployment:
//!
//! - `RETRACE_API_KEY` — Bearer key required on every request when set
//! - `RETRACE_RATE_LIMIT` — requests/second ceiling (0 switches it off)
//! - `RETRACE_CORS_ORIGINS` — `*`, a comma-separated allow-list, or unset
//!   for local development hosts only

mod auth;
mod handlers;
mod middleware;
mod types;

// Re-export handlers and types for integration tests (via `retrace::api::*`)
#[allow(unused_imports)]
pub use handlers::{
    create_session_handler, export_handler, generate_handler, graph_handler,
    process_node_handler, run_analysis_handler, select_workflow_handler, session_status_handler,
};
#[allow(unused_imports)]
pub use types::{
    ErrorBody, ExportResponse, GenerateResponse, GraphResponse, ProcessResponse,
    SelectWorkflowRequest, SessionStatusResponse, StartSessionRequest, StartSessionResponse,
};

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware as axum_middleware,
    routing::{get, post},
};
use retrace_core::{HandoffEmitter, InlineCapture, NullOracle, Orchestrator, RetraceError};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Captures arrive inline in session bodies; 8 MiB covers HAR-derived
/// payloads from long browsing sessions.
const CAPTURE_BODY_LIMIT: usize = 8 * 1024 * 1024;

// =============================================================================
// SERVER STATE
// =============================================================================

/// Session registry: id -> orchestrator. Sessions are independent; the lock
/// serializes registry access, never analysis across sessions.
pub type SessionRegistry =
    BTreeMap<String, Orchestrator<InlineCapture, NullOracle, HandoffEmitter>>;

/// Shared server state containing the session registry.
#[derive(Clone)]
pub struct AppState {
    /// All live sessions.
    pub sessions: Arc<RwLock<SessionRegistry>>,
    /// Monotonic counter backing session ids.
    counter: Arc<AtomicU64>,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    /// Create empty state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(BTreeMap::new())),
            counter: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Allocate the next session id.
    #[must_use]
    pub fn next_session_id(&self) -> String {
        format!("sess-{}", self.counter.fetch_add(1, Ordering::SeqCst))
    }
}

/// Current wall-clock time in epoch milliseconds.
///
/// The core never reads a clock; this is the single place the app samples it.
#[must_use]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// =============================================================================
// CORS POLICY
// =============================================================================

/// Which origins may call the API, resolved from `RETRACE_CORS_ORIGINS`.
enum CorsPolicy {
    /// `*` — any origin. Development only.
    Open,
    /// Explicit comma-separated allow-list.
    AllowList(Vec<HeaderValue>),
    /// Unset (or nothing usable configured): local development hosts only.
    Localhost,
}

impl CorsPolicy {
    fn from_env() -> Self {
        match std::env::var("RETRACE_CORS_ORIGINS").ok().as_deref() {
            Some("*") => Self::Open,
            Some(raw) => {
                let origins: Vec<HeaderValue> = raw
                    .split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .filter_map(|origin| match origin.parse::<HeaderValue>() {
                        Ok(value) => Some(value),
                        Err(_) => {
                            tracing::warn!(origin, "dropping unparseable CORS origin");
                            None
                        }
                    })
                    .collect();
                if origins.is_empty() {
                    Self::Localhost
                } else {
                    Self::AllowList(origins)
                }
            }
            None => Self::Localhost,
        }
    }

    fn into_layer(self) -> CorsLayer {
        let restricted = |origins: Vec<HeaderValue>| {
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        };

        match self {
            Self::Open => {
                tracing::warn!(
                    "RETRACE_CORS_ORIGINS=* leaves the session API callable from any origin"
                );
                CorsLayer::permissive()
            }
            Self::AllowList(origins) => {
                tracing::info!(count = origins.len(), "CORS allow-list active");
                restricted(origins)
            }
            Self::Localhost => {
                tracing::info!("CORS restricted to local development hosts");
                restricted(localhost_origins())
            }
        }
    }
}

/// Local development origins: the server's own default port plus the common
/// dev-UI ports, on both localhost spellings.
fn localhost_origins() -> Vec<HeaderValue> {
    let mut origins = Vec::new();
    for host in ["localhost", "127.0.0.1"] {
        for port in [3000u16, 5173, 8080] {
            if let Ok(value) = format!("http://{host}:{port}").parse() {
                origins.push(value);
            }
        }
    }
    origins
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Build the session router with its middleware stack.
///
/// Requests pass CORS and tracing first, then the rate ceiling, then the
/// API-key gate, and only then reach a handler — unauthenticated floods are
/// cut off before they can touch the registry lock.
pub fn create_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/sessions", post(handlers::create_session_handler))
        .route("/sessions/{id}", get(handlers::session_status_handler))
        .route(
            "/sessions/{id}/workflow",
            post(handlers::select_workflow_handler),
        )
        .route(
            "/sessions/{id}/process",
            post(handlers::process_node_handler),
        )
        .route("/sessions/{id}/run", post(handlers::run_analysis_handler))
        .route("/sessions/{id}/graph", get(handlers::graph_handler))
        .route("/sessions/{id}/generate", post(handlers::generate_handler))
        .route("/sessions/{id}/export", post(handlers::export_handler));

    // API-key gate, innermost so everything else has already filtered
    if auth::api_key_from_env().is_some() {
        tracing::info!("API-key gate active");
        router = router.layer(axum_middleware::from_fn(auth::require_api_key));
    } else {
        tracing::warn!(
            "RETRACE_API_KEY is unset; the session API accepts anonymous requests"
        );
    }

    // Rate ceiling
    match middleware::rate_limit_from_env() {
        Some(ceiling) => {
            tracing::info!(per_second = ceiling.get(), "request throttling active");
            router = router.layer(axum_middleware::from_fn_with_state(
                middleware::shared_limiter(ceiling),
                middleware::throttle,
            ));
        }
        None => {
            tracing::info!("request throttling disabled");
        }
    }

    // Outermost: body bound, CORS, request tracing
    router
        .layer(axum::extract::DefaultBodyLimit::max(CAPTURE_BODY_LIMIT))
        .layer(CorsPolicy::from_env().into_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Start the HTTP server.
pub async fn run_server(addr: &str) -> Result<(), RetraceError> {
    let state = AppState::new();
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| RetraceError::IoError(format!("Bind failed: {}", e)))?;

    tracing::info!("Retrace HTTP server listening on {}", addr);

    axum::serve(listener, router)
        .await
        .map_err(|e| RetraceError::IoError(format!("Server error: {}", e)))
}
