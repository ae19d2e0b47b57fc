//! # Core Type Definitions
//!
//! This module contains the shared types for the Retrace analysis substrate:
//! - Graph and session identifiers (`NodeId`, `SessionId`, `WorkflowId`)
//! - Parameter classification records (`ParamKind`, `ParamOrigin`, `ClassifiedParam`)
//! - Session log structures (`LogLevel`, `LogEntry`)
//! - Error types (`RetraceError`) with wire-visible error codes
//!
//! ## Determinism Guarantees
//!
//! All types in this module:
//! - Use integer arithmetic only (no floating-point)
//! - Implement `Ord` for deterministic ordering in `BTreeMap`/`BTreeSet`
//! - Serialize stably (field order fixed by declaration order)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Unique identifier for a node in the dependency graph.
///
/// Ids are assigned in insertion order and never reused; they double as the
/// deterministic tie-break for topological ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

/// Unique identifier for an analysis session.
///
/// Sessions are fully independent; the id is assigned by the caller
/// (the server layer) and is opaque to the core.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    /// Create a new session id from a string.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Unique identifier for a discovered workflow within one session.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

impl WorkflowId {
    /// Create a new workflow id from a string.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Declared input variables: name -> example value captured in the session.
pub type InputVariables = BTreeMap<String, String>;

// =============================================================================
// PARAMETER CLASSIFICATION
// =============================================================================

/// The taxonomy of dynamic values found in a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    /// The value equals a declared input example; substituted at runtime.
    UserInput,
    /// Authentication or session token (bearer, api key, auth cookie).
    AuthToken,
    /// Constant within one session, varies across sessions; resolved via a
    /// bootstrap source (initial page HTML or cookie).
    SessionConstant,
    /// Produced by an earlier request in the capture.
    Dependency,
}

/// Where in the consumer request a classified value was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamOrigin {
    /// A request header value.
    Header,
    /// A query-string parameter.
    Query,
    /// A body field or fragment.
    Body,
    /// A cookie sent in the `Cookie` header.
    Cookie,
    /// Part of the URL path itself.
    Url,
}

/// Classification verdict for one dynamic value on a request node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedParam {
    /// What the value is.
    pub kind: ParamKind,
    /// Where it was observed.
    pub origin: ParamOrigin,
}

impl ClassifiedParam {
    /// Create a new classification record.
    #[must_use]
    pub const fn new(kind: ParamKind, origin: ParamOrigin) -> Self {
        Self { kind, origin }
    }
}

// =============================================================================
// SESSION LOG
// =============================================================================

/// Severity of a session log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// A structured entry in the session log.
///
/// Recoverable failures MUST be enumerated here; the orchestrator never
/// swallows them silently. Fatal failures additionally carry their
/// wire-visible code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Severity.
    pub level: LogLevel,
    /// Originating component, e.g. `resolver` or `orchestrator`.
    pub component: String,
    /// Human-readable message.
    pub message: String,
    /// Wire-visible error code, when the entry records a failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub code: Option<String>,
    /// Optional structured payload (e.g. the literal that failed to resolve).
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl LogEntry {
    /// Create an informational entry.
    #[must_use]
    pub fn info(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: LogLevel::Info,
            component: component.into(),
            message: message.into(),
            code: None,
            data: None,
        }
    }

    /// Create a warning entry.
    #[must_use]
    pub fn warn(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: LogLevel::Warn,
            component: component.into(),
            message: message.into(),
            code: None,
            data: None,
        }
    }

    /// Create an error entry carrying a wire-visible code.
    #[must_use]
    pub fn error(
        component: impl Into<String>,
        message: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            level: LogLevel::Error,
            component: component.into(),
            message: message.into(),
            code: Some(code.into()),
            data: None,
        }
    }

    /// Attach a structured payload to the entry.
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the Retrace analysis pipeline.
///
/// - No silent failures
/// - Use `Result<T, RetraceError>` for fallible operations
/// - The core should never panic; all errors must be recoverable or surface
///   as a session failure with a wire-visible code
#[derive(Debug, Clone, Error)]
pub enum RetraceError {
    /// The capture contains no meaningful requests.
    #[error("Capture contains no meaningful requests")]
    HarEmpty,

    /// No candidate URLs are available for action selection.
    #[error("No URLs available for analysis")]
    NoUrlsAvailable,

    /// The requested or identified URL is not present in the capture.
    #[error("URL not found in capture: {0}")]
    UrlNotFoundInHar(String),

    /// Neither the oracle nor the fallback could identify an action URL.
    #[error("Could not identify the action URL")]
    UrlIdentificationFailed,

    /// Workflow discovery produced no usable grouping.
    #[error("Workflow discovery failed: {0}")]
    WorkflowDiscoveryFailed(String),

    /// The requested node was not found in the graph.
    #[error("Node not found: {0:?}")]
    NodeNotFound(NodeId),

    /// Committing an edge would close a cycle.
    #[error("Circular dependency: edge {from:?} -> {to:?} would close a cycle")]
    CircularDependencies {
        /// The consumer side of the rejected edge.
        from: NodeId,
        /// The provider side of the rejected edge.
        to: NodeId,
    },

    /// Code generation was requested before the graph was complete.
    #[error("Analysis incomplete: {0}")]
    AnalysisIncomplete(String),

    /// A node-processing tick failed.
    #[error("Node processing failed: {0}")]
    NodeProcessingFailed(String),

    /// The external code emitter failed.
    #[error("Code generation failed: {0}")]
    CodeGenerationFailed(String),

    /// An event arrived in a state that does not accept it.
    #[error("Event {event} not accepted in state {state}")]
    InvalidTransition {
        /// The state the session was in.
        state: String,
        /// The rejected event.
        event: String,
    },

    /// The oracle could not be reached or returned an unusable payload.
    /// Always recoverable: every call site has a deterministic fallback.
    #[error("Oracle unavailable: {0}")]
    OracleUnavailable(String),

    /// A serialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A deserialization error occurred.
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// An I/O error occurred in an external collaborator.
    #[error("I/O error: {0}")]
    IoError(String),
}

impl RetraceError {
    /// The wire-visible error code for this error.
    ///
    /// The first ten codes are part of the external contract; the remaining
    /// codes are internal but follow the same convention.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::HarEmpty => "HAR_EMPTY",
            Self::NoUrlsAvailable => "NO_URLS_AVAILABLE",
            Self::UrlNotFoundInHar(_) => "URL_NOT_FOUND_IN_HAR",
            Self::UrlIdentificationFailed => "URL_IDENTIFICATION_FAILED",
            Self::WorkflowDiscoveryFailed(_) => "WORKFLOW_DISCOVERY_FAILED",
            Self::NodeNotFound(_) => "NODE_NOT_FOUND",
            Self::CircularDependencies { .. } => "CIRCULAR_DEPENDENCIES",
            Self::AnalysisIncomplete(_) => "ANALYSIS_INCOMPLETE",
            Self::NodeProcessingFailed(_) => "NODE_PROCESSING_FAILED",
            Self::CodeGenerationFailed(_) => "CODE_GENERATION_FAILED",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::OracleUnavailable(_) => "ORACLE_UNAVAILABLE",
            Self::SerializationError(_) => "SERIALIZATION_ERROR",
            Self::DeserializationError(_) => "DESERIALIZATION_ERROR",
            Self::IoError(_) => "IO_ERROR",
        }
    }

    /// Whether this error is fatal for the session.
    ///
    /// Fatal errors transition the session to `failed`; recoverable errors
    /// are logged and execution continues.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::OracleUnavailable(_))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_wire_visible() {
        assert_eq!(RetraceError::HarEmpty.code(), "HAR_EMPTY");
        assert_eq!(
            RetraceError::CircularDependencies {
                from: NodeId(1),
                to: NodeId(2)
            }
            .code(),
            "CIRCULAR_DEPENDENCIES"
        );
        assert_eq!(
            RetraceError::NodeNotFound(NodeId(7)).code(),
            "NODE_NOT_FOUND"
        );
    }

    #[test]
    fn oracle_failure_is_recoverable() {
        assert!(!RetraceError::OracleUnavailable("timeout".into()).is_fatal());
        assert!(RetraceError::HarEmpty.is_fatal());
    }

    #[test]
    fn log_entry_constructors() {
        let entry = LogEntry::error("resolver", "literal not found", "NODE_PROCESSING_FAILED")
            .with_data(serde_json::json!({"literal": "abc123"}));
        assert_eq!(entry.level, LogLevel::Error);
        assert_eq!(entry.code.as_deref(), Some("NODE_PROCESSING_FAILED"));
        assert!(entry.data.is_some());
    }

    #[test]
    fn node_ids_order_by_value() {
        let mut ids = vec![NodeId(3), NodeId(1), NodeId(2)];
        ids.sort();
        assert_eq!(ids, vec![NodeId(1), NodeId(2), NodeId(3)]);
    }
}
