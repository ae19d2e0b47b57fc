//! # Session Module
//!
//! One analysis session: the capture, the graph, the discovered workflows,
//! the processing queue, and the structured log.
//!
//! Sessions are fully independent of each other; the graph and queue are
//! owned exclusively by the session, the capture and cookie store are
//! read-only after start, and the core never reads a clock (timestamps are
//! caller-supplied epoch milliseconds).

use crate::capture::{CaptureReport, CookieStore};
use crate::classifier::AuthAnalysis;
use crate::graph::DependencyGraph;
use crate::request::CapturedRequest;
use crate::types::{InputVariables, LogEntry, NodeId, RetraceError, SessionId, WorkflowId};
use crate::workflow::Workflow;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

// =============================================================================
// CODEGEN HANDOFF
// =============================================================================

/// Everything the external code generator consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodegenHandoff {
    /// Fully serialized graph (nodes, edges, per-node state).
    pub graph: serde_json::Value,
    /// The action URL the generated program reproduces.
    pub action_url: String,
    /// The master node of the active workflow.
    pub master_node_id: NodeId,
    /// The serialized workflow record.
    pub workflow: Workflow,
    /// Declared input variables to substitute at runtime.
    pub input_variables: InputVariables,
}

// =============================================================================
// SESSION
// =============================================================================

/// All intermediate state of one analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Session identifier (caller-assigned, opaque).
    pub id: SessionId,
    /// The natural-language description of the target action.
    pub prompt: String,
    /// Captured requests in capture order. Read-only after start.
    pub capture: Vec<CapturedRequest>,
    /// Capture-time cookie state. Read-only after start.
    pub cookies: CookieStore,
    /// Validation summary from parsing.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub report: Option<CaptureReport>,
    /// The dependency graph.
    #[serde(skip)]
    pub graph: DependencyGraph,
    /// Discovered workflows.
    pub workflows: Vec<Workflow>,
    /// The selected workflow, once chosen.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub active_workflow_id: Option<WorkflowId>,
    /// FIFO queue of node ids awaiting processing.
    pub queue: VecDeque<NodeId>,
    /// The node currently being processed, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub in_process_node_id: Option<NodeId>,
    /// Declared input variables: name -> example value.
    pub input_variables: InputVariables,
    /// Session-level authentication verdict.
    pub auth: AuthAnalysis,
    /// Structured log; recoverable failures are always enumerated here.
    pub logs: Vec<LogEntry>,
    /// The action URL, once identified.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub action_url: Option<String>,
    /// The codegen handoff, built at generation time.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub handoff: Option<CodegenHandoff>,
    /// Emitted source text, when the emitter has run.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub generated_code: Option<String>,
    /// Creation time, epoch milliseconds (caller-supplied).
    pub created_at_ms: u64,
    /// Last activity time, epoch milliseconds (caller-supplied).
    pub last_activity_ms: u64,
}

impl Session {
    /// Create a new session.
    #[must_use]
    pub fn new(
        id: SessionId,
        prompt: impl Into<String>,
        input_variables: InputVariables,
        now_ms: u64,
    ) -> Self {
        Self {
            id,
            prompt: prompt.into(),
            capture: Vec::new(),
            cookies: CookieStore::new(),
            report: None,
            graph: DependencyGraph::new(),
            workflows: Vec::new(),
            active_workflow_id: None,
            queue: VecDeque::new(),
            in_process_node_id: None,
            input_variables,
            auth: AuthAnalysis::default(),
            logs: Vec::new(),
            action_url: None,
            handoff: None,
            generated_code: None,
            created_at_ms: now_ms,
            last_activity_ms: now_ms,
        }
    }

    /// Record activity.
    pub fn touch(&mut self, now_ms: u64) {
        self.last_activity_ms = self.last_activity_ms.max(now_ms);
    }

    // =========================================================================
    // LOGGING
    // =========================================================================

    /// Append a log entry.
    pub fn log(&mut self, entry: LogEntry) {
        self.logs.push(entry);
    }

    /// Record a failure with its wire-visible code and optional payload.
    pub fn log_failure(
        &mut self,
        component: &str,
        error: &RetraceError,
        data: Option<serde_json::Value>,
    ) {
        let mut entry = LogEntry::error(component, error.to_string(), error.code());
        if let Some(data) = data {
            entry = entry.with_data(data);
        }
        self.logs.push(entry);
    }

    // =========================================================================
    // QUEUE
    // =========================================================================

    /// Append a node to the queue tail.
    ///
    /// Enforces the queue invariants: the id must exist in the graph and may
    /// appear at most once at a time.
    pub fn enqueue(&mut self, id: NodeId) -> Result<(), RetraceError> {
        if !self.graph.contains_node(id) {
            return Err(RetraceError::NodeNotFound(id));
        }
        if !self.queue.contains(&id) {
            self.queue.push_back(id);
        }
        Ok(())
    }

    /// The queue head, without removing it.
    #[must_use]
    pub fn peek_queue(&self) -> Option<NodeId> {
        self.queue.front().copied()
    }

    /// Remove and return the queue head.
    pub fn dequeue(&mut self) -> Option<NodeId> {
        self.queue.pop_front()
    }

    // =========================================================================
    // WORKFLOWS
    // =========================================================================

    /// The active workflow record, when one is selected.
    #[must_use]
    pub fn active_workflow(&self) -> Option<&Workflow> {
        let id = self.active_workflow_id.as_ref()?;
        self.workflows.iter().find(|w| &w.id == id)
    }

    /// Mutable view of the active workflow.
    #[must_use]
    pub fn active_workflow_mut(&mut self) -> Option<&mut Workflow> {
        let id = self.active_workflow_id.clone()?;
        self.workflows.iter_mut().find(|w| w.id == id)
    }

    // =========================================================================
    // COMPLETION
    // =========================================================================

    /// Whether the analysis is complete.
    ///
    /// True iff the graph is complete, the queue is empty, a master node
    /// exists for the active workflow, and a non-empty action URL is known.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        let master_exists = self
            .active_workflow()
            .and_then(|w| w.master_node_id)
            .is_some_and(|id| self.graph.contains_node(id));
        self.graph.is_complete()
            && self.queue.is_empty()
            && master_exists
            && self.action_url.as_deref().is_some_and(|u| !u.is_empty())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NodeContent, RequestState};
    use std::collections::BTreeMap;

    fn session() -> Session {
        Session::new(
            SessionId::new("s1"),
            "search items",
            InputVariables::new(),
            1_000,
        )
    }

    fn add_request_node(session: &mut Session, url: &str) -> NodeId {
        session.graph.add_node(
            NodeContent::Request(RequestState::new(CapturedRequest::new("GET", url))),
            BTreeMap::new(),
        )
    }

    #[test]
    fn enqueue_requires_graph_membership() {
        let mut session = session();
        let err = session.enqueue(NodeId(0)).expect_err("not in graph");
        assert_eq!(err.code(), "NODE_NOT_FOUND");

        let id = add_request_node(&mut session, "https://api/a");
        session.enqueue(id).expect("enqueue");
        assert_eq!(session.peek_queue(), Some(id));
    }

    #[test]
    fn enqueue_deduplicates() {
        let mut session = session();
        let id = add_request_node(&mut session, "https://api/a");

        session.enqueue(id).expect("enqueue");
        session.enqueue(id).expect("enqueue again");
        assert_eq!(session.queue.len(), 1);
    }

    #[test]
    fn queue_is_fifo() {
        let mut session = session();
        let a = add_request_node(&mut session, "https://api/a");
        let b = add_request_node(&mut session, "https://api/b");

        session.enqueue(a).expect("enqueue");
        session.enqueue(b).expect("enqueue");
        assert_eq!(session.dequeue(), Some(a));
        assert_eq!(session.dequeue(), Some(b));
        assert_eq!(session.dequeue(), None);
    }

    #[test]
    fn touch_never_rewinds() {
        let mut session = session();
        session.touch(5_000);
        session.touch(2_000);
        assert_eq!(session.last_activity_ms, 5_000);
    }

    #[test]
    fn incomplete_without_master_or_action_url() {
        let session = session();
        // Empty graph is complete, but no master/action URL exists
        assert!(session.graph.is_complete());
        assert!(!session.is_complete());
    }

    #[test]
    fn failure_logging_carries_code() {
        let mut session = session();
        session.log_failure(
            "resolver",
            &RetraceError::NodeProcessingFailed("literal unresolved".into()),
            Some(serde_json::json!({"literal": "abc"})),
        );

        assert_eq!(session.logs.len(), 1);
        assert_eq!(
            session.logs[0].code.as_deref(),
            Some("NODE_PROCESSING_FAILED")
        );
        assert!(session.logs[0].data.is_some());
    }
}
