//! # End-to-End Scenario Tests
//!
//! Each test drives a full session through the public orchestrator API:
//! capture in, state machine through parse → discover → select → process,
//! assertions on the resulting graph and handoff.

use retrace_core::{
    CaptureInput, CapturedRequest, CapturedResponse, CookieStore, DependencyGraph,
    FunctionDefinition, HandoffEmitter, InlineCapture, InputVariables, NodeContent, NodeKind,
    NullOracle, Oracle, Orchestrator, ParamKind, RequestBody, RequestState, RetraceError,
    SerializableGraph, Session, SessionEvent, SessionId, SessionState,
};
use serde_json::json;
use std::collections::BTreeMap;

// =============================================================================
// HELPERS
// =============================================================================

fn json_response(body: &str) -> CapturedResponse {
    CapturedResponse::new(
        200,
        "OK",
        vec![("Content-Type".to_string(), "application/json".to_string())],
        Some(body.to_string()),
    )
}

fn session(prompt: &str) -> Session {
    Session::new(SessionId::new("scenario"), prompt, InputVariables::new(), 1_000)
}

/// Oracle with canned per-function payloads; anything unset is unavailable,
/// forcing the deterministic fallback for that call.
#[derive(Default)]
struct ScriptedOracle {
    workflows: Option<serde_json::Value>,
    end_url: Option<serde_json::Value>,
    dynamic_parts: Option<serde_json::Value>,
    input_variables: Option<serde_json::Value>,
}

impl Oracle for ScriptedOracle {
    fn call_function(
        &self,
        _prompt: &str,
        _schema: &FunctionDefinition,
        name: &str,
    ) -> Result<serde_json::Value, RetraceError> {
        let canned = match name {
            "discover_workflows" => &self.workflows,
            "identify_end_url" => &self.end_url,
            "identify_dynamic_parts" => &self.dynamic_parts,
            "identify_input_variables" => &self.input_variables,
            _ => &None,
        };
        canned
            .clone()
            .ok_or_else(|| RetraceError::OracleUnavailable(format!("unscripted: {name}")))
    }
}

// =============================================================================
// SCENARIO 1 — PUBLIC API
// =============================================================================

#[test]
fn public_api_completes_without_auth() {
    let mut request = CapturedRequest::new("GET", "https://api.example.com/public/items?q=shoe");
    request.query.push(("q".to_string(), "shoe".to_string()));
    request.response = Some(json_response("{\"items\":[{\"id\":1}]}"));
    let input = CaptureInput {
        requests: vec![request],
        cookies: CookieStore::new(),
    };

    let oracle = ScriptedOracle {
        workflows: Some(json!({
            "workflows": [{
                "id": "wf-search",
                "name": "Search items",
                "category": "search",
                "priority": 9,
                "complexity": 1,
                "requires_user_input": true,
                "endpoints": [{
                    "url": "https://api.example.com/public/items",
                    "method": "GET",
                    "role": "primary"
                }]
            }]
        })),
        input_variables: Some(json!({
            "identified_variables": [
                {"variable_name": "q", "variable_value": "shoe"}
            ]
        })),
        ..ScriptedOracle::default()
    };

    let mut orch = Orchestrator::new(
        session("search items"),
        InlineCapture(input),
        oracle,
        HandoffEmitter,
    );
    orch.handle(SessionEvent::StartSession, 2_000).expect("start");

    // One workflow, category search, master is the captured request
    assert_eq!(orch.session().workflows.len(), 1);
    assert_eq!(
        orch.session().workflows[0].category,
        retrace_core::WorkflowCategory::Search
    );
    let master_id = orch.session().workflows[0].master_node_id.expect("master");
    let master = orch.session().graph.get_node(master_id).expect("node");
    assert_eq!(master.kind(), NodeKind::Master);

    // Queue empties on the first tick
    let state = orch
        .handle(SessionEvent::ProcessNextNode, 3_000)
        .expect("tick");
    assert_eq!(state, SessionState::ReadyForCodeGen);
    assert!(orch.session().is_complete());

    // No auth classified: the /public/ path shortcut applies
    assert_eq!(orch.session().auth, retrace_core::AuthAnalysis::public());
    let master = orch.session().graph.get_node(master_id).expect("node");
    let state = master.request_state().expect("state");
    assert!(state.classified_params.values().all(|p| p.kind != ParamKind::AuthToken));

    // The search term became a named input, not a dependency
    assert_eq!(state.classified_inputs.get("q"), Some(&"shoe".to_string()));
    assert_eq!(
        state.classified_params.get("shoe").map(|p| p.kind),
        Some(ParamKind::UserInput)
    );
}

// =============================================================================
// SCENARIO 2 — BEARER TOKEN FROM LOGIN
// =============================================================================

#[test]
fn bearer_token_resolves_to_login_response() {
    let mut login = CapturedRequest::new("POST", "https://api.example.com/x/login");
    login.response = Some(json_response("{\"access_token\":\"AAA\"}"));
    let mut items = CapturedRequest::new("GET", "https://api.example.com/x/items");
    items
        .headers
        .push(("Authorization".to_string(), "Bearer AAA".to_string()));
    items.response = Some(json_response("{\"items\":[]}"));
    let input = CaptureInput {
        requests: vec![login, items],
        cookies: CookieStore::new(),
    };

    let oracle = ScriptedOracle {
        workflows: Some(json!({
            "workflows": [{
                "id": "wf-items",
                "name": "List items",
                "category": "search",
                "priority": 9,
                "complexity": 2,
                "requires_user_input": false,
                "endpoints": [
                    {"url": "https://api.example.com/x/items", "method": "GET", "role": "primary"},
                    {"url": "https://api.example.com/x/login", "method": "POST", "role": "supporting"}
                ]
            }]
        })),
        end_url: Some(json!({"url": "https://api.example.com/x/items"})),
        ..ScriptedOracle::default()
    };

    let mut orch = Orchestrator::new(
        session("list my items"),
        InlineCapture(input),
        oracle,
        HandoffEmitter,
    );
    orch.handle(SessionEvent::StartSession, 2_000).expect("start");
    let state = orch.run(3_000).expect("run");
    assert_eq!(state, SessionState::ReadyForCodeGen);
    assert!(orch.session().is_complete());

    let graph = &orch.session().graph;
    let master_id = orch
        .session()
        .active_workflow()
        .and_then(|w| w.master_node_id)
        .expect("master");

    // AAA classified as an auth token on the items node
    let master = graph.get_node(master_id).expect("node");
    assert_eq!(
        master
            .request_state()
            .expect("state")
            .classified_params
            .get("AAA")
            .map(|p| p.kind),
        Some(ParamKind::AuthToken)
    );

    // Dependency edge items -> login labeled AAA
    let login_id = graph
        .get_all_nodes()
        .find(|n| {
            n.request_state()
                .is_some_and(|s| s.request.url.ends_with("/x/login"))
        })
        .map(|n| n.id)
        .expect("login node");
    let labeled = graph
        .edges()
        .any(|(from, to, label)| from == master_id && to == login_id && label == Some("AAA"));
    assert!(labeled);

    // No sentinel; generation succeeds
    assert!(!graph.get_all_nodes().any(|n| n.kind() == NodeKind::NotFound));
    let state = orch
        .handle(SessionEvent::GenerateCode, 4_000)
        .expect("generate");
    assert_eq!(state, SessionState::CodeGenerated);
    assert_eq!(
        orch.session().handoff.as_ref().map(|h| h.action_url.as_str()),
        Some("https://api.example.com/x/items")
    );
}

// =============================================================================
// SCENARIO 3 — CYCLIC REJECTION
// =============================================================================

#[test]
fn two_cycle_is_rejected_transactionally() {
    // login's response carries AAA; refresh sends AAA in its body AND its
    // response carries AAA again, inviting a 2-cycle
    let mut graph = DependencyGraph::new();
    let mut login = CapturedRequest::new("POST", "https://api.example.com/x/login");
    login.response = Some(json_response("{\"access_token\":\"AAA\"}"));
    let mut refresh = CapturedRequest::new("POST", "https://api.example.com/x/refresh");
    refresh.body = Some(RequestBody::Text("{\"token\":\"AAA\"}".to_string()));
    refresh.response = Some(json_response("{\"token\":\"AAA\"}"));

    let login_id = graph.add_node(
        NodeContent::Request(RequestState::new(login)),
        BTreeMap::new(),
    );
    let refresh_id = graph.add_node(
        NodeContent::Request(RequestState::new(refresh)),
        BTreeMap::new(),
    );
    graph
        .add_edge(login_id, refresh_id, Some("AAA".to_string()))
        .expect("first edge");

    let before = SerializableGraph::from(&graph);
    let err = graph
        .add_edge(refresh_id, login_id, Some("AAA".to_string()))
        .expect_err("cycle");

    assert_eq!(err.code(), "CIRCULAR_DEPENDENCIES");
    assert_eq!(SerializableGraph::from(&graph), before);
    assert!(graph.detect_cycles().is_empty());
}

// =============================================================================
// SCENARIO 4 — STATIC VALUE FILTERED
// =============================================================================

#[test]
fn static_content_type_is_filtered() {
    let mut request = CapturedRequest::new("GET", "https://api.example.com/public/items");
    request
        .headers
        .push(("Content-Type".to_string(), "application/json".to_string()));
    request.response = Some(json_response("{\"items\":[]}"));
    let input = CaptureInput {
        requests: vec![request],
        cookies: CookieStore::new(),
    };

    // The oracle proposes the static token; validation must drop it
    let oracle = ScriptedOracle {
        dynamic_parts: Some(json!({"dynamic_parts": ["application/json"]})),
        ..ScriptedOracle::default()
    };

    let mut orch = Orchestrator::new(
        session("fetch items"),
        InlineCapture(input),
        oracle,
        HandoffEmitter,
    );
    orch.handle(SessionEvent::StartSession, 2_000).expect("start");
    orch.handle(SessionEvent::ProcessNextNode, 3_000).expect("tick");

    // No dependency was created: the master is the only node
    assert_eq!(orch.session().graph.node_count(), 1);
    assert_eq!(orch.session().graph.edge_count(), 0);
    assert!(orch.session().is_complete());

    // The drop is visible in the session log
    assert!(orch.session().logs.iter().any(|entry| {
        entry.message.contains("known static token")
            && entry.data == Some(json!({"value": "application/json"}))
    }));
}

// =============================================================================
// SCENARIO 5 — SYNTHETIC BOOTSTRAP
// =============================================================================

#[test]
fn synthetic_bootstrap_for_shared_session_id() {
    // No initial HTML captured; five requests share sessionId=Z9SESSION and
    // no response produces it
    let requests: Vec<CapturedRequest> = (0..5)
        .map(|i| {
            let mut req = CapturedRequest::new(
                "GET",
                format!("https://api.example.com/x/p{i}?sessionId=Z9SESSION"),
            );
            req.query
                .push(("sessionId".to_string(), "Z9SESSION".to_string()));
            req
        })
        .collect();
    let input = CaptureInput {
        requests,
        cookies: CookieStore::new(),
    };

    let mut orch = Orchestrator::new(
        session("open page one"),
        InlineCapture(input),
        NullOracle,
        HandoffEmitter,
    );
    orch.handle(SessionEvent::StartSession, 2_000).expect("start");
    let state = orch.run(3_000).expect("run");
    assert_eq!(state, SessionState::ReadyForCodeGen);
    assert!(orch.session().is_complete());

    // One synthetic bootstrap provider, attached to the earliest user's origin
    let graph = &orch.session().graph;
    let bootstrap_nodes: Vec<_> = graph
        .get_all_nodes()
        .filter(|n| n.attrs.get("synthetic") == Some(&json!(true)))
        .collect();
    assert_eq!(bootstrap_nodes.len(), 1);
    let source = bootstrap_nodes[0];
    assert_eq!(
        source.attrs.get("bootstrap_source"),
        Some(&json!("initial-page-html"))
    );
    assert!(
        source
            .request_state()
            .is_some_and(|s| s.request.url.starts_with("https://api.example.com"))
    );
    assert!(source.provided_values().contains("Z9SESSION"));

    // The master's unresolved set is covered by the bootstrap edge
    let master_id = orch
        .session()
        .active_workflow()
        .and_then(|w| w.master_node_id)
        .expect("master");
    let covered = graph
        .edges()
        .any(|(from, to, label)| from == master_id && to == source.id && label == Some("Z9SESSION"));
    assert!(covered);
}

// =============================================================================
// SCENARIO 6 — AMBIGUOUS PROVIDER TIE-BREAK
// =============================================================================

#[test]
fn simpler_provider_wins_ambiguous_resolution() {
    // Provider A: GET /api/v1/me, 4 headers, small JSON response
    let mut simple = CapturedRequest::new("GET", "https://api.example.com/api/v1/me");
    for i in 0..4 {
        simple.headers.push((format!("X-H{i}"), "v".to_string()));
    }
    simple.response = Some(json_response("{\"profile\":\"ok\",\"tok\":\"T1TOKEN\"}"));

    // Provider B: POST /api/v1/report, 9 headers, 2,500-byte JSON response
    let mut heavy = CapturedRequest::new("POST", "https://api.example.com/api/v1/report");
    for i in 0..9 {
        heavy.headers.push((format!("X-H{i}"), "v".to_string()));
    }
    heavy.body = Some(RequestBody::Text("x".repeat(1500)));
    heavy.response = Some(json_response(&format!(
        "{{\"blob\":\"{}\",\"tok\":\"T1TOKEN\"}}",
        "x".repeat(2400)
    )));

    let mut consumer = CapturedRequest::new("GET", "https://api.example.com/api/v1/items");
    consumer
        .headers
        .push(("X-Session-Token".to_string(), "T1TOKEN".to_string()));
    consumer.response = Some(json_response("{\"items\":[]}"));

    let input = CaptureInput {
        requests: vec![simple, heavy, consumer],
        cookies: CookieStore::new(),
    };

    let oracle = ScriptedOracle {
        workflows: Some(json!({
            "workflows": [{
                "id": "wf-items",
                "name": "List items",
                "category": "search",
                "priority": 9,
                "complexity": 2,
                "requires_user_input": false,
                "endpoints": [
                    {"url": "https://api.example.com/api/v1/items", "method": "GET", "role": "primary"},
                    {"url": "https://api.example.com/api/v1/me", "method": "GET", "role": "supporting"},
                    {"url": "https://api.example.com/api/v1/report", "method": "POST", "role": "supporting"}
                ]
            }]
        })),
        end_url: Some(json!({"url": "https://api.example.com/api/v1/items"})),
        ..ScriptedOracle::default()
    };

    let mut orch = Orchestrator::new(
        session("list items"),
        InlineCapture(input),
        oracle,
        HandoffEmitter,
    );
    orch.handle(SessionEvent::StartSession, 2_000).expect("start");
    orch.run(3_000).expect("run");

    let graph = &orch.session().graph;
    let master_id = orch
        .session()
        .active_workflow()
        .and_then(|w| w.master_node_id)
        .expect("master");

    // The edge points at the simple GET provider, not the heavy POST
    let provider = graph
        .edges()
        .find(|(from, _, label)| *from == master_id && *label == Some("T1TOKEN"))
        .and_then(|(_, to, _)| graph.get_node(to))
        .expect("provider");
    assert!(
        provider
            .request_state()
            .is_some_and(|s| s.request.url.ends_with("/api/v1/me"))
    );
}
