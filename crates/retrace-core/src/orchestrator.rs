//! # Session Orchestrator
//!
//! The workflow-driven state machine that sequences the analysis:
//!
//! ```text
//! initializing → parsingHar → discoveringWorkflows → awaitingWorkflowSelection
//!      → processingDependencies ⇄ processingNode → readyForCodeGen
//!      → codeGenerated | failed
//! ```
//!
//! The orchestrator is single-threaded and cooperative: one
//! `PROCESS_NEXT_NODE` tick at a time, never interleaved within a session.
//! Each tick stages its graph edits on a clone and commits atomically at the
//! end; a rejected edge or an external cancel leaves the committed state
//! untouched, including the queue head.

use crate::capture::{CaptureQuality, CaptureSource, validate_capture};
use crate::classifier::classify;
use crate::dynamics::{identify_dynamic_parts, validate_dynamic_parts};
use crate::graph::{NodeContent, NodeKind, RequestState};
use crate::oracle::{
    DynamicPartsPayload, EndUrlPayload, EndpointRole, InputVariablesPayload, Oracle,
    WorkflowsPayload, decode_payload, discover_workflows_schema, identify_dynamic_parts_schema,
    identify_end_url_schema, identify_input_variables_schema,
};
use crate::primitives::MAX_PROCESSING_TICKS;
use crate::request::CapturedRequest;
use crate::resolver::{ResolutionSource, ResolverConfig, resolve_values};
use crate::session::{CodegenHandoff, Session};
use crate::types::{LogEntry, NodeId, RetraceError, WorkflowId};
use crate::workflow::{Workflow, discover_workflows, pick_primary_workflow};
use crate::{bootstrap, classifier};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

// =============================================================================
// STATES & EVENTS
// =============================================================================

/// Orchestrator states. `codeGenerated` and `failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Initializing,
    ParsingHar,
    DiscoveringWorkflows,
    AwaitingWorkflowSelection,
    ProcessingDependencies,
    ProcessingNode,
    ReadyForCodeGen,
    CodeGenerated,
    Failed,
}

impl SessionState {
    /// Wire name of the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::ParsingHar => "parsingHar",
            Self::DiscoveringWorkflows => "discoveringWorkflows",
            Self::AwaitingWorkflowSelection => "awaitingWorkflowSelection",
            Self::ProcessingDependencies => "processingDependencies",
            Self::ProcessingNode => "processingNode",
            Self::ReadyForCodeGen => "readyForCodeGen",
            Self::CodeGenerated => "codeGenerated",
            Self::Failed => "failed",
        }
    }

    /// Whether the state accepts no further lifecycle events.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::CodeGenerated | Self::Failed)
    }
}

/// Events accepted by the orchestrator.
///
/// Lifecycle events are state-gated; the rest are global and may arrive in
/// any non-terminal state, mutating context without changing the state.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Begin the session: parse, discover, auto-select.
    StartSession,
    /// Choose the workflow to analyze.
    SelectWorkflow {
        /// The workflow to activate.
        workflow_id: WorkflowId,
    },
    /// Process one node from the queue.
    ProcessNextNode,
    /// Build the handoff and run the external emitter.
    GenerateCode,
    /// Re-point the active workflow's master node. Global.
    SetMasterNode {
        /// Target node; must be a master node.
        node_id: NodeId,
    },
    /// Append a log entry. Global.
    AddLog {
        /// The entry to append.
        entry: LogEntry,
    },
    /// Replace the session-level auth verdict. Global.
    UpdateAuthAnalysis {
        /// The new verdict.
        analysis: classifier::AuthAnalysis,
    },
    /// Replace the processing queue. Global.
    UpdateProcessingQueue {
        /// New queue contents, head first.
        queue: Vec<NodeId>,
    },
}

/// Result of one processing tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The node was classified and resolved; edits committed.
    Processed(NodeId),
    /// The node was skipped (JavaScript/HTML or non-request).
    Skipped(NodeId),
    /// Nothing left to process.
    QueueEmpty,
    /// An external cancel aborted the tick; nothing committed.
    Cancelled,
}

// =============================================================================
// CANCELLATION
// =============================================================================

/// Cooperative cancel signal, checked between tick steps.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create a fresh, unset token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of the current tick.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear the signal so the next tick can run.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

// =============================================================================
// CODE EMITTER
// =============================================================================

/// External collaborator that turns a completed handoff into source text.
pub trait CodeEmitter {
    /// Emit executable source for the handoff.
    fn emit(&self, handoff: &CodegenHandoff) -> Result<String, RetraceError>;
}

/// Default emitter: serializes the handoff as pretty JSON for an external
/// generator to consume.
#[derive(Debug, Clone, Copy, Default)]
pub struct HandoffEmitter;

impl CodeEmitter for HandoffEmitter {
    fn emit(&self, handoff: &CodegenHandoff) -> Result<String, RetraceError> {
        serde_json::to_string_pretty(handoff)
            .map_err(|e| RetraceError::CodeGenerationFailed(e.to_string()))
    }
}

// =============================================================================
// ORCHESTRATOR
// =============================================================================

/// Drives one session through the analysis state machine.
pub struct Orchestrator<C, O, E>
where
    C: CaptureSource,
    O: Oracle,
    E: CodeEmitter,
{
    capture_source: C,
    oracle: O,
    emitter: E,
    config: ResolverConfig,
    cancel: CancelToken,
    state: SessionState,
    session: Session,
}

impl<C, O, E> Orchestrator<C, O, E>
where
    C: CaptureSource,
    O: Oracle,
    E: CodeEmitter,
{
    /// Create an orchestrator over a fresh session.
    #[must_use]
    pub fn new(session: Session, capture_source: C, oracle: O, emitter: E) -> Self {
        Self {
            capture_source,
            oracle,
            emitter,
            config: ResolverConfig::default(),
            cancel: CancelToken::new(),
            state: SessionState::Initializing,
            session,
        }
    }

    /// Override the resolver configuration.
    #[must_use]
    pub fn with_config(mut self, config: ResolverConfig) -> Self {
        self.config = config;
        self
    }

    /// Attach an external cancel token.
    #[must_use]
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The session being driven.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Consume the orchestrator, yielding the session.
    #[must_use]
    pub fn into_session(self) -> Session {
        self.session
    }

    // =========================================================================
    // EVENT HANDLING
    // =========================================================================

    /// Handle one event.
    ///
    /// Fatal errors transition the session to `failed` and are returned;
    /// recoverable conditions are logged in the session and execution
    /// continues.
    pub fn handle(
        &mut self,
        event: SessionEvent,
        now_ms: u64,
    ) -> Result<SessionState, RetraceError> {
        self.session.touch(now_ms);

        // Global events: any non-terminal state, no state change
        match &event {
            SessionEvent::SetMasterNode { .. }
            | SessionEvent::AddLog { .. }
            | SessionEvent::UpdateAuthAnalysis { .. }
            | SessionEvent::UpdateProcessingQueue { .. } => {
                if self.state.is_terminal() {
                    return Err(self.invalid(&event));
                }
                self.handle_global(event)?;
                return Ok(self.state);
            }
            _ => {}
        }

        match (self.state, event) {
            (SessionState::Initializing, SessionEvent::StartSession) => {
                match self.start_session() {
                    Ok(()) => Ok(self.state),
                    Err(e) => Err(self.fatal("orchestrator", e)),
                }
            }
            (
                SessionState::AwaitingWorkflowSelection,
                SessionEvent::SelectWorkflow { workflow_id },
            ) => match self.select_workflow(&workflow_id) {
                Ok(()) => Ok(self.state),
                Err(e) => Err(self.fatal("orchestrator", e)),
            },
            (SessionState::ProcessingDependencies, SessionEvent::ProcessNextNode) => {
                match self.process_next_node() {
                    Ok(_) => Ok(self.state),
                    Err(e) => Err(self.fatal("orchestrator", e)),
                }
            }
            (SessionState::ReadyForCodeGen, SessionEvent::GenerateCode) => {
                match self.generate_code() {
                    Ok(()) => Ok(self.state),
                    Err(e) => Err(self.fatal("orchestrator", e)),
                }
            }
            (_, event) => Err(self.invalid(&event)),
        }
    }

    /// Drive `PROCESS_NEXT_NODE` ticks until the session leaves the
    /// processing loop, bounded by [`MAX_PROCESSING_TICKS`].
    pub fn run(&mut self, now_ms: u64) -> Result<SessionState, RetraceError> {
        for _ in 0..MAX_PROCESSING_TICKS {
            if self.state != SessionState::ProcessingDependencies {
                break;
            }
            self.handle(SessionEvent::ProcessNextNode, now_ms)?;
            if self.cancel.is_cancelled() {
                break;
            }
        }
        Ok(self.state)
    }

    fn invalid(&self, event: &SessionEvent) -> RetraceError {
        RetraceError::InvalidTransition {
            state: self.state.as_str().to_string(),
            event: format!("{event:?}"),
        }
    }

    fn fatal(&mut self, component: &str, error: RetraceError) -> RetraceError {
        self.session.log_failure(component, &error, None);
        self.state = SessionState::Failed;
        error
    }

    fn handle_global(&mut self, event: SessionEvent) -> Result<(), RetraceError> {
        match event {
            SessionEvent::SetMasterNode { node_id } => {
                let node = self
                    .session
                    .graph
                    .get_node(node_id)
                    .ok_or(RetraceError::NodeNotFound(node_id))?;
                if node.kind() != NodeKind::Master {
                    return Err(RetraceError::NodeProcessingFailed(format!(
                        "node {} is not a master node",
                        node_id.0
                    )));
                }
                if let Some(workflow) = self.session.active_workflow_mut() {
                    workflow.master_node_id = Some(node_id);
                }
                Ok(())
            }
            SessionEvent::AddLog { entry } => {
                self.session.log(entry);
                Ok(())
            }
            SessionEvent::UpdateAuthAnalysis { analysis } => {
                self.session.auth = analysis;
                Ok(())
            }
            SessionEvent::UpdateProcessingQueue { queue } => {
                let mut seen = BTreeSet::new();
                let mut replacement = std::collections::VecDeque::new();
                for id in queue {
                    if !self.session.graph.contains_node(id) {
                        return Err(RetraceError::NodeNotFound(id));
                    }
                    if seen.insert(id) {
                        replacement.push_back(id);
                    }
                }
                self.session.queue = replacement;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    // =========================================================================
    // START: PARSE → DISCOVER → AUTO-SELECT
    // =========================================================================

    fn start_session(&mut self) -> Result<(), RetraceError> {
        // parsingHar
        self.state = SessionState::ParsingHar;
        let input = self.capture_source.load()?;
        let report = validate_capture(&input.requests);
        match report.quality {
            CaptureQuality::Empty => {
                self.session.report = Some(report);
                return Err(RetraceError::HarEmpty);
            }
            CaptureQuality::Poor => {
                self.session.log(
                    LogEntry::warn(
                        "capture",
                        format!(
                            "capture quality is poor: {} meaningful of {} requests",
                            report.meaningful_request_count, report.total_request_count
                        ),
                    )
                    .with_data(serde_json::json!({ "issues": report.issues })),
                );
            }
            CaptureQuality::Good => {}
        }
        self.session.report = Some(report);
        self.session.capture = input.requests;
        self.session.cookies = input.cookies;

        // discoveringWorkflows
        self.state = SessionState::DiscoveringWorkflows;
        self.discover()?;

        // awaitingWorkflowSelection: auto-select the primary when possible
        self.state = SessionState::AwaitingWorkflowSelection;
        if let Some(primary) = pick_primary_workflow(&self.session.workflows) {
            let id = primary.id.clone();
            self.select_workflow(&id)?;
        }
        Ok(())
    }

    fn discover(&mut self) -> Result<(), RetraceError> {
        let workflows = match self.oracle_discover() {
            Ok(workflows) if !workflows.is_empty() => workflows,
            Ok(_) => {
                self.session.log(LogEntry::warn(
                    "workflow",
                    "oracle grouping matched no captured requests; using heuristic discovery",
                ));
                discover_workflows(&self.session.capture)
            }
            Err(error) => {
                self.session.log(
                    LogEntry::warn(
                        "workflow",
                        format!("oracle unavailable, using heuristic discovery: {error}"),
                    )
                    .with_data(serde_json::json!({ "code": error.code() })),
                );
                discover_workflows(&self.session.capture)
            }
        };

        if workflows.is_empty() {
            return Err(RetraceError::WorkflowDiscoveryFailed(
                "no workflow groupings found in capture".to_string(),
            ));
        }
        self.session.workflows = workflows;
        Ok(())
    }

    fn oracle_discover(&mut self) -> Result<Vec<Workflow>, RetraceError> {
        let listing = self.url_listing();
        let prompt = format!(
            "Target action: {}\nCaptured endpoints:\n{listing}",
            self.session.prompt
        );
        let value = self.oracle.call_function(
            &prompt,
            &discover_workflows_schema(),
            "discover_workflows",
        )?;
        let payload: WorkflowsPayload = decode_payload(value)?;

        let capture = &self.session.capture;
        let mut workflows = Vec::new();
        for spec in payload.workflows {
            let member_indices: Vec<usize> = capture
                .iter()
                .enumerate()
                .filter(|(_, request)| {
                    spec.endpoints
                        .iter()
                        .any(|e| base_of(&e.url) == request.base_url())
                })
                .map(|(i, _)| i)
                .collect();
            if member_indices.is_empty() {
                continue;
            }
            let Some(primary) = spec
                .endpoints
                .iter()
                .find(|e| e.role == EndpointRole::Primary)
                .or_else(|| spec.endpoints.first())
            else {
                continue;
            };
            workflows.push(Workflow {
                id: WorkflowId::new(spec.id),
                name: spec.name,
                category: spec.category,
                priority: spec.priority.clamp(1, 10),
                complexity: spec.complexity.clamp(1, 10),
                requires_user_input: spec.requires_user_input,
                primary_method: primary.method.to_ascii_uppercase(),
                primary_url: base_of(&primary.url).to_string(),
                member_indices,
                master_node_id: None,
                member_node_ids: Vec::new(),
            });
        }
        Ok(workflows)
    }

    fn url_listing(&self) -> String {
        let mut lines = BTreeSet::new();
        for request in &self.session.capture {
            lines.insert(format!(
                "{} {}",
                request.method.to_ascii_uppercase(),
                request.base_url()
            ));
        }
        lines.into_iter().collect::<Vec<_>>().join("\n")
    }

    // =========================================================================
    // WORKFLOW SELECTION
    // =========================================================================

    fn select_workflow(&mut self, workflow_id: &WorkflowId) -> Result<(), RetraceError> {
        let workflow = self
            .session
            .workflows
            .iter()
            .find(|w| &w.id == workflow_id)
            .cloned()
            .ok_or_else(|| {
                RetraceError::WorkflowDiscoveryFailed(format!(
                    "unknown workflow {}",
                    workflow_id.as_str()
                ))
            })?;

        let action_url = self.identify_action_url(&workflow)?;
        let action_index = self
            .session
            .capture
            .iter()
            .position(|r| r.base_url() == base_of(&action_url))
            .ok_or_else(|| RetraceError::UrlNotFoundInHar(action_url.clone()))?;
        let action_request = self.session.capture[action_index].clone();

        self.identify_input_variables(&action_request);

        // Insert the master node; exactly one per workflow, created here.
        let master_id = self.session.graph.add_node(
            NodeContent::Master(RequestState::new(action_request.clone())),
            BTreeMap::from([(
                "workflow".to_string(),
                serde_json::json!(workflow_id.as_str()),
            )]),
        );
        self.session.action_url = Some(action_request.url.clone());
        self.session.active_workflow_id = Some(workflow_id.clone());
        if let Some(active) = self.session.active_workflow_mut() {
            active.master_node_id = Some(master_id);
            active.member_node_ids.push(master_id);
        }
        self.session.enqueue(master_id)?;

        self.session.log(LogEntry::info(
            "orchestrator",
            format!(
                "selected workflow {} with action {}",
                workflow_id.as_str(),
                action_request.url
            ),
        ));
        self.state = SessionState::ProcessingDependencies;
        Ok(())
    }

    fn identify_action_url(&mut self, workflow: &Workflow) -> Result<String, RetraceError> {
        let candidates: BTreeSet<String> = workflow
            .member_indices
            .iter()
            .filter_map(|&i| self.session.capture.get(i))
            .map(|r| r.base_url().to_string())
            .collect();
        if candidates.is_empty() {
            return Err(RetraceError::NoUrlsAvailable);
        }

        let listing = candidates
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Target action: {}\nCandidate URLs:\n{listing}",
            self.session.prompt
        );
        let oracle_url = self
            .oracle
            .call_function(&prompt, &identify_end_url_schema(), "identify_end_url")
            .and_then(decode_payload::<EndUrlPayload>)
            .map(|p| p.url);

        match oracle_url {
            Ok(url) if candidates.contains(base_of(&url)) => Ok(url),
            Ok(url) => {
                // The oracle must answer with one of the presented URLs;
                // anything else falls back to the primary endpoint.
                self.session.log(
                    LogEntry::warn(
                        "orchestrator",
                        format!("oracle proposed a URL outside the capture: {url}"),
                    )
                    .with_data(serde_json::json!({ "code": "URL_NOT_FOUND_IN_HAR" })),
                );
                Ok(workflow.primary_url.clone())
            }
            Err(error) => {
                self.session.log(LogEntry::warn(
                    "orchestrator",
                    format!("oracle unavailable for action URL, using primary endpoint: {error}"),
                ));
                Ok(workflow.primary_url.clone())
            }
        }
    }

    fn identify_input_variables(&mut self, action_request: &CapturedRequest) {
        let prompt = format!(
            "Target action: {}\nRequest:\n{}",
            self.session.prompt,
            action_request.to_curl()
        );
        let identified = self
            .oracle
            .call_function(
                &prompt,
                &identify_input_variables_schema(),
                "identify_input_variables",
            )
            .and_then(decode_payload::<InputVariablesPayload>);

        match identified {
            Ok(payload) => {
                for variable in payload.identified_variables {
                    // Declared inputs win over oracle suggestions
                    self.session
                        .input_variables
                        .entry(variable.variable_name)
                        .or_insert(variable.variable_value);
                }
            }
            Err(error) => {
                self.session.log(LogEntry::info(
                    "orchestrator",
                    format!("input-variable identification skipped: {error}"),
                ));
            }
        }
    }

    // =========================================================================
    // NODE PROCESSING
    // =========================================================================

    fn process_next_node(&mut self) -> Result<TickOutcome, RetraceError> {
        if self.session.is_complete() {
            self.state = SessionState::ReadyForCodeGen;
            return Ok(TickOutcome::QueueEmpty);
        }
        let Some(head) = self.session.peek_queue() else {
            self.state = SessionState::ReadyForCodeGen;
            return Ok(TickOutcome::QueueEmpty);
        };

        self.state = SessionState::ProcessingNode;
        self.session.in_process_node_id = Some(head);

        let outcome = self.process_node(head);
        self.session.in_process_node_id = None;

        match outcome {
            Ok(TickOutcome::Cancelled) => {
                self.session.log(LogEntry::info(
                    "orchestrator",
                    format!("tick for node {} cancelled; state unchanged", head.0),
                ));
                self.state = SessionState::ProcessingDependencies;
                Ok(TickOutcome::Cancelled)
            }
            Ok(result) => {
                self.state = if self.session.queue.is_empty() {
                    SessionState::ReadyForCodeGen
                } else {
                    SessionState::ProcessingDependencies
                };
                Ok(result)
            }
            Err(error) => Err(error),
        }
    }

    /// One tick: dynamic parts → classify → resolve → extend graph.
    ///
    /// All writes are staged on a graph clone and committed as a unit; any
    /// error (including a rejected edge) leaves the session untouched.
    fn process_node(&mut self, head: NodeId) -> Result<TickOutcome, RetraceError> {
        let node = self
            .session
            .graph
            .get_node(head)
            .ok_or(RetraceError::NodeNotFound(head))?;
        let node_kind = node.kind();
        let Some(request) = node.request_state().map(|s| s.request.clone()) else {
            // Cookie and sentinel nodes carry nothing to process
            self.session.dequeue();
            return Ok(TickOutcome::Skipped(head));
        };

        // JavaScript/HTML requests are never analyzed as consumers
        if request.is_javascript_or_html() {
            let mut staged = self.session.graph.clone();
            if let Some(state) = staged.get_node_mut(head).and_then(|n| n.request_state_mut()) {
                state.unresolved_values.clear();
            }
            self.session.graph = staged;
            self.session.dequeue();
            return Ok(TickOutcome::Skipped(head));
        }

        if self.cancel.is_cancelled() {
            return Ok(TickOutcome::Cancelled);
        }

        // Dynamic parts (oracle with deterministic fallback), then validation
        let mut tick_logs: Vec<LogEntry> = Vec::new();
        let candidates = self.dynamic_parts(&request, &mut tick_logs);
        let validated = validate_dynamic_parts(&candidates);
        for rejected in &validated.rejected {
            tick_logs.push(
                LogEntry::info(
                    "dynamics",
                    format!("dropped candidate value: {}", rejected.reason),
                )
                .with_data(serde_json::json!({ "value": rejected.value })),
            );
        }

        if self.cancel.is_cancelled() {
            return Ok(TickOutcome::Cancelled);
        }

        // Classification
        let classification = classify(
            &request,
            &validated.accepted,
            &self.session.input_variables,
            &self.session.capture,
            &self.config,
        );
        if node_kind == NodeKind::Master {
            self.session.auth = classification.auth;
        }

        // Residuals: dependencies/auth tokens plus session constants; the
        // resolver checks cookies and prior requests, the bootstrap search
        // covers what is left.
        let residual: BTreeSet<String> = classification
            .residual
            .union(&classification.session_constants)
            .cloned()
            .collect();
        let consumer_index = self
            .session
            .capture
            .iter()
            .position(|r| r.same_identity(&request));
        let resolutions = resolve_values(
            &request,
            &residual,
            &self.session.cookies,
            &self.session.capture,
            consumer_index,
        );

        if self.cancel.is_cancelled() {
            return Ok(TickOutcome::Cancelled);
        }

        // Stage all edits on a clone; commit only if every edge is accepted
        let mut staged = self.session.graph.clone();
        let mut pending: Vec<NodeId> = Vec::new();

        if let Some(state) = staged.get_node_mut(head).and_then(|n| n.request_state_mut()) {
            state.unresolved_values = residual.clone();
            state.classified_inputs.extend(classification.inputs.clone());
            state
                .classified_params
                .extend(classification.params.clone());
        }

        for resolution in resolutions {
            let literal = resolution.literal;
            match resolution.source {
                ResolutionSource::Cookie { name } => {
                    let value = self
                        .session
                        .cookies
                        .value(&name)
                        .unwrap_or_default()
                        .to_string();
                    let cookie_id = match staged.find_cookie_node(&name) {
                        Some(id) => id,
                        None => staged.add_node(
                            NodeContent::Cookie {
                                name: name.clone(),
                                value,
                                provided_values: BTreeSet::new(),
                            },
                            BTreeMap::new(),
                        ),
                    };
                    staged.add_edge(head, cookie_id, Some(literal.clone()))?;
                    tick_logs.push(LogEntry::info(
                        "resolver",
                        format!("resolved {literal} from cookie {name}"),
                    ));
                }
                ResolutionSource::PriorRequest { index, location } => {
                    let provider_request = self.session.capture[index].clone();
                    let provider_id = match staged.find_node_by_request(&provider_request) {
                        Some(id) => id,
                        None => {
                            let id = staged.add_node(
                                NodeContent::Request(RequestState::new(provider_request.clone())),
                                BTreeMap::new(),
                            );
                            pending.push(id);
                            id
                        }
                    };
                    staged.add_edge(head, provider_id, Some(literal.clone()))?;
                    tick_logs.push(
                        LogEntry::info(
                            "resolver",
                            format!(
                                "resolved {literal} from {} {}",
                                provider_request.method, provider_request.url
                            ),
                        )
                        .with_data(serde_json::json!({ "location": location })),
                    );
                }
                ResolutionSource::NotFound => {
                    match bootstrap::find_bootstrap_source(
                        &literal,
                        &self.session.capture,
                        &self.config,
                    ) {
                        Some(source) => {
                            let attrs = bootstrap_attrs(&source);
                            let provider_id = match source.provider_index {
                                Some(index) => {
                                    let page = self.session.capture[index].clone();
                                    match staged.find_node_by_request(&page) {
                                        Some(id) => id,
                                        None => {
                                            let id = staged.add_node(
                                                NodeContent::Request(RequestState::new(page)),
                                                BTreeMap::new(),
                                            );
                                            pending.push(id);
                                            id
                                        }
                                    }
                                }
                                None => {
                                    let synthetic =
                                        CapturedRequest::new("GET", source.origin.clone());
                                    match staged.find_node_by_request(&synthetic) {
                                        Some(id) => id,
                                        None => staged.add_node(
                                            NodeContent::Request(RequestState::new(synthetic)),
                                            BTreeMap::new(),
                                        ),
                                    }
                                }
                            };
                            staged.update_node(provider_id, attrs)?;
                            staged.add_edge(head, provider_id, Some(literal.clone()))?;
                            tick_logs.push(LogEntry::info(
                                "bootstrap",
                                format!(
                                    "resolved {literal} via {} source at {}",
                                    source.subtype.as_str(),
                                    source.origin
                                ),
                            ));
                        }
                        None => {
                            let sentinel = staged.add_node(
                                NodeContent::NotFound {
                                    literal: literal.clone(),
                                },
                                BTreeMap::new(),
                            );
                            staged.add_edge(head, sentinel, None)?;
                            tick_logs.push(
                                LogEntry::warn(
                                    "resolver",
                                    format!("no source found for {literal}"),
                                )
                                .with_data(serde_json::json!({ "literal": literal })),
                            );
                        }
                    }
                }
            }
        }

        if self.cancel.is_cancelled() {
            return Ok(TickOutcome::Cancelled);
        }

        // Commit
        self.session.graph = staged;
        self.session.dequeue();
        for id in &pending {
            self.session.enqueue(*id)?;
        }
        self.track_members(head, &pending);
        for entry in tick_logs {
            self.session.log(entry);
        }
        Ok(TickOutcome::Processed(head))
    }

    fn dynamic_parts(
        &mut self,
        request: &CapturedRequest,
        tick_logs: &mut Vec<LogEntry>,
    ) -> BTreeSet<String> {
        let prompt = format!(
            "Target action: {}\nRequest:\n{}",
            self.session.prompt,
            request.to_curl()
        );
        match self
            .oracle
            .call_function(
                &prompt,
                &identify_dynamic_parts_schema(),
                "identify_dynamic_parts",
            )
            .and_then(decode_payload::<DynamicPartsPayload>)
        {
            Ok(payload) => payload.dynamic_parts.into_iter().collect(),
            Err(error) => {
                tick_logs.push(LogEntry::info(
                    "dynamics",
                    format!("oracle unavailable, using rule-based dynamic parts: {error}"),
                ));
                identify_dynamic_parts(request)
            }
        }
    }

    /// Record graph nodes that belong to the active workflow's member set.
    fn track_members(&mut self, head: NodeId, pending: &[NodeId]) {
        if let Some(workflow) = self.session.active_workflow_mut() {
            for id in std::iter::once(head).chain(pending.iter().copied()) {
                if !workflow.member_node_ids.contains(&id) {
                    workflow.member_node_ids.push(id);
                }
            }
        }
    }

    // =========================================================================
    // CODE GENERATION
    // =========================================================================

    fn generate_code(&mut self) -> Result<(), RetraceError> {
        if !self.session.is_complete() {
            let unresolved = self.session.graph.get_unresolved_nodes();
            return Err(RetraceError::AnalysisIncomplete(format!(
                "{} nodes unresolved, queue length {}",
                unresolved.len(),
                self.session.queue.len()
            )));
        }
        let workflow = self
            .session
            .active_workflow()
            .cloned()
            .ok_or_else(|| RetraceError::AnalysisIncomplete("no active workflow".to_string()))?;
        let master_node_id = workflow.master_node_id.ok_or_else(|| {
            RetraceError::AnalysisIncomplete("active workflow has no master node".to_string())
        })?;

        let handoff = CodegenHandoff {
            graph: self.session.graph.to_json()?,
            action_url: self.session.action_url.clone().unwrap_or_default(),
            master_node_id,
            workflow,
            input_variables: self.session.input_variables.clone(),
        };
        let code = self
            .emitter
            .emit(&handoff)
            .map_err(|e| RetraceError::CodeGenerationFailed(e.to_string()))?;

        self.session.handoff = Some(handoff);
        self.session.generated_code = Some(code);
        self.state = SessionState::CodeGenerated;
        Ok(())
    }
}

/// Strip a URL's query string.
fn base_of(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

/// Node attributes recording a bootstrap source.
fn bootstrap_attrs(
    source: &bootstrap::BootstrapSource,
) -> BTreeMap<String, serde_json::Value> {
    BTreeMap::from([
        (
            "bootstrap_source".to_string(),
            serde_json::json!(source.subtype.as_str()),
        ),
        (
            "extraction_pattern".to_string(),
            serde_json::json!(source.extraction_pattern),
        ),
        ("synthetic".to_string(), serde_json::json!(source.synthetic)),
    ])
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureInput, InlineCapture};
    use crate::oracle::NullOracle;
    use crate::request::CapturedResponse;
    use crate::types::{InputVariables, SessionId};

    fn json_response(body: &str) -> CapturedResponse {
        CapturedResponse::new(
            200,
            "OK",
            vec![(
                "Content-Type".to_string(),
                "application/json".to_string(),
            )],
            Some(body.to_string()),
        )
    }

    fn public_search_capture() -> CaptureInput {
        let mut req = CapturedRequest::new("GET", "https://api.example.com/public/items?q=shoe");
        req.query.push(("q".to_string(), "shoe".to_string()));
        req.response = Some(json_response("{\"items\":[]}"));
        CaptureInput {
            requests: vec![req],
            cookies: crate::capture::CookieStore::new(),
        }
    }

    fn orchestrator(
        input: CaptureInput,
        prompt: &str,
    ) -> Orchestrator<InlineCapture, NullOracle, HandoffEmitter> {
        // "shoe" is declared as an input example so the search term
        // classifies as user input rather than an unresolvable dependency
        let inputs = InputVariables::from([("q".to_string(), "shoe".to_string())]);
        let session = Session::new(SessionId::new("s1"), prompt, inputs, 1_000);
        Orchestrator::new(session, InlineCapture(input), NullOracle, HandoffEmitter)
    }

    #[test]
    fn start_session_auto_selects_primary_workflow() {
        let mut orch = orchestrator(public_search_capture(), "search items");
        let state = orch
            .handle(SessionEvent::StartSession, 2_000)
            .expect("start");

        assert_eq!(state, SessionState::ProcessingDependencies);
        assert!(orch.session().active_workflow_id.is_some());
        assert_eq!(orch.session().queue.len(), 1);
        assert!(orch.session().action_url.is_some());
    }

    #[test]
    fn empty_capture_fails_with_har_empty() {
        let mut orch = orchestrator(CaptureInput::default(), "anything");
        let err = orch
            .handle(SessionEvent::StartSession, 2_000)
            .expect_err("empty");

        assert_eq!(err.code(), "HAR_EMPTY");
        assert_eq!(orch.state(), SessionState::Failed);
    }

    #[test]
    fn public_request_completes_in_one_tick() {
        let mut orch = orchestrator(public_search_capture(), "search items");
        orch.handle(SessionEvent::StartSession, 2_000).expect("start");
        let state = orch
            .handle(SessionEvent::ProcessNextNode, 3_000)
            .expect("tick");

        assert_eq!(state, SessionState::ReadyForCodeGen);
        assert!(orch.session().is_complete());
        assert_eq!(orch.session().auth, classifier::AuthAnalysis::public());
    }

    #[test]
    fn generate_code_yields_handoff() {
        let mut orch = orchestrator(public_search_capture(), "search items");
        orch.handle(SessionEvent::StartSession, 2_000).expect("start");
        orch.handle(SessionEvent::ProcessNextNode, 3_000).expect("tick");
        let state = orch
            .handle(SessionEvent::GenerateCode, 4_000)
            .expect("generate");

        assert_eq!(state, SessionState::CodeGenerated);
        let session = orch.session();
        let handoff = session.handoff.as_ref().expect("handoff");
        assert!(!handoff.action_url.is_empty());
        assert!(session.generated_code.as_ref().is_some_and(|c| !c.is_empty()));
    }

    #[test]
    fn events_in_wrong_state_are_rejected() {
        let mut orch = orchestrator(public_search_capture(), "search items");
        let err = orch
            .handle(SessionEvent::ProcessNextNode, 2_000)
            .expect_err("not started");
        assert_eq!(err.code(), "INVALID_TRANSITION");
    }

    #[test]
    fn terminal_state_rejects_global_events() {
        let mut orch = orchestrator(CaptureInput::default(), "x");
        let _ = orch.handle(SessionEvent::StartSession, 2_000);
        assert_eq!(orch.state(), SessionState::Failed);

        let err = orch
            .handle(
                SessionEvent::AddLog {
                    entry: LogEntry::info("test", "late entry"),
                },
                3_000,
            )
            .expect_err("terminal");
        assert_eq!(err.code(), "INVALID_TRANSITION");
    }

    #[test]
    fn cancel_leaves_queue_head_unchanged() {
        let mut orch = orchestrator(public_search_capture(), "search items");
        orch.handle(SessionEvent::StartSession, 2_000).expect("start");
        let head = orch.session().peek_queue();

        let token = CancelToken::new();
        orch = orch.with_cancel_token(token.clone());
        token.cancel();

        orch.handle(SessionEvent::ProcessNextNode, 3_000).expect("tick");
        assert_eq!(orch.session().peek_queue(), head);
        assert_eq!(orch.state(), SessionState::ProcessingDependencies);
        assert!(orch.session().in_process_node_id.is_none());

        token.reset();
        orch.handle(SessionEvent::ProcessNextNode, 4_000).expect("tick");
        assert_eq!(orch.state(), SessionState::ReadyForCodeGen);
    }

    #[test]
    fn reprocessing_a_resolved_node_is_a_noop() {
        // Two requests: the master depends on a login response, so the first
        // tick enqueues the provider and the queue stays non-empty
        let mut login = CapturedRequest::new("POST", "https://api.example.com/x/login");
        login.response = Some(json_response("{\"access_token\":\"AAATOK\"}"));
        let mut items = CapturedRequest::new("GET", "https://api.example.com/x/search");
        items
            .headers
            .push(("Authorization".to_string(), "Bearer AAATOK".to_string()));
        items.response = Some(json_response("{\"items\":[]}"));
        let input = CaptureInput {
            requests: vec![login, items],
            cookies: crate::capture::CookieStore::new(),
        };

        let mut orch = orchestrator(input, "search items");
        orch.handle(SessionEvent::StartSession, 2_000).expect("start");
        let master = orch
            .session()
            .active_workflow()
            .and_then(|w| w.master_node_id)
            .expect("master");

        // First tick resolves AAATOK and enqueues the login provider
        orch.handle(SessionEvent::ProcessNextNode, 3_000).expect("tick");
        let nodes_after_first = orch.session().graph.node_count();
        let edges_after_first = orch.session().graph.edge_count();

        // Put the already-resolved master back at the head and re-process it
        let mut queue: Vec<NodeId> = vec![master];
        queue.extend(orch.session().queue.iter().copied());
        orch.handle(SessionEvent::UpdateProcessingQueue { queue }, 4_000)
            .expect("requeue");
        orch.handle(SessionEvent::ProcessNextNode, 5_000).expect("re-tick");

        assert_eq!(orch.session().graph.node_count(), nodes_after_first);
        assert_eq!(orch.session().graph.edge_count(), edges_after_first);
    }

    #[test]
    fn update_queue_rejects_foreign_ids() {
        let mut orch = orchestrator(public_search_capture(), "search items");
        orch.handle(SessionEvent::StartSession, 2_000).expect("start");

        let err = orch
            .handle(
                SessionEvent::UpdateProcessingQueue {
                    queue: vec![NodeId(999)],
                },
                3_000,
            )
            .expect_err("foreign id");
        assert_eq!(err.code(), "NODE_NOT_FOUND");
    }

    #[test]
    fn run_drives_to_ready() {
        let mut orch = orchestrator(public_search_capture(), "search items");
        orch.handle(SessionEvent::StartSession, 2_000).expect("start");
        let state = orch.run(3_000).expect("run");
        assert_eq!(state, SessionState::ReadyForCodeGen);
    }
}
