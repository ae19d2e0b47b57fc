//! # retrace-core
//!
//! The deterministic analysis engine for Retrace - THE LOGIC.
//!
//! Retrace ingests a captured HTTP session (a HAR archive plus optional
//! cookie state) and a natural-language description of a target user action,
//! and produces a labeled dependency DAG an external code generator executes
//! in topological order. This crate is the analysis pipeline:
//!
//! - request model with curl-equivalent canonical form
//! - dependency graph with transactional, cycle-rejecting edge insertion
//! - dynamic-value identification, classification, and resolution search
//! - workflow discovery with deterministic primary selection
//! - the session orchestrator state machine
//!
//! ## Architectural Constraints
//!
//! The core:
//! - Is the ONLY place where analysis state exists (stateful)
//! - Is closed: HAR parsing, LLM calls, and code emission plug in through
//!   the `CaptureSource`, `Oracle`, and `CodeEmitter` traits
//! - Never reads a clock; timestamps are caller-supplied
//! - Has NO async, NO network dependencies (pure Rust)

// =============================================================================
// MODULES
// =============================================================================

pub mod bootstrap;
pub mod capture;
pub mod classifier;
pub mod dynamics;
pub mod export;
pub mod graph;
pub mod oracle;
pub mod orchestrator;
pub mod primitives;
pub mod request;
pub mod resolver;
pub mod session;
pub mod types;
pub mod workflow;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    ClassifiedParam, InputVariables, LogEntry, LogLevel, NodeId, ParamKind, ParamOrigin,
    RetraceError, SessionId, WorkflowId,
};

// =============================================================================
// RE-EXPORTS: Request Model & Capture
// =============================================================================

pub use capture::{
    CaptureInput, CaptureQuality, CaptureReport, CaptureSource, CookieRecord, CookieStore,
    InlineCapture, validate_capture,
};
pub use request::{CapturedRequest, CapturedResponse, RequestBody, RequestIdentity};

// =============================================================================
// RE-EXPORTS: Dependency Graph
// =============================================================================

pub use graph::{
    DependencyGraph, GraphNode, NodeContent, NodeKind, RequestState, SerializableGraph,
    SerializedEdge,
};

// =============================================================================
// RE-EXPORTS: Analysis Pipeline
// =============================================================================

pub use bootstrap::{BootstrapSource, BootstrapSubtype, find_bootstrap_source};
pub use classifier::{AuthAnalysis, AuthRequirement, AuthScheme, Classification, classify};
pub use dynamics::{identify_dynamic_parts, validate_dynamic_parts};
pub use resolver::{
    MatchLocation, Resolution, ResolutionSource, ResolverConfig, resolve_values, simplicity_score,
};
pub use workflow::{Workflow, WorkflowCategory, discover_workflows, pick_primary_workflow};

// =============================================================================
// RE-EXPORTS: Oracle Contract
// =============================================================================

pub use oracle::{FunctionDefinition, NullOracle, Oracle};

// =============================================================================
// RE-EXPORTS: Session & Orchestrator
// =============================================================================

pub use orchestrator::{
    CancelToken, CodeEmitter, HandoffEmitter, Orchestrator, SessionEvent, SessionState,
    TickOutcome,
};
pub use session::{CodegenHandoff, Session};

// =============================================================================
// RE-EXPORTS: Canonical Export
// =============================================================================

pub use export::{
    CanonicalGraph, CanonicalHeader, canonical_checksum, decode_canonical, export_canonical,
    verify_canonical,
};
