//! # Retrace MCP Server
//!
//! Implements `ServerHandler` with 7 MCP tools that proxy to the Retrace
//! HTTP API.

use crate::client::RetraceClient;
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    schemars, tool, tool_handler, tool_router,
};
use serde::Deserialize;

// =============================================================================
// MCP SERVER
// =============================================================================

/// MCP server that bridges to a Retrace HTTP API.
#[derive(Clone)]
pub struct RetraceMcp {
    client: RetraceClient,
    #[allow(dead_code)]
    tool_router: ToolRouter<Self>,
}

// =============================================================================
// TOOL PARAMETER STRUCTS
// =============================================================================

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct StartSessionParams {
    /// Natural-language description of the user action to reproduce.
    #[schemars(description = "Natural-language description of the user action to reproduce")]
    pub prompt: String,
    /// The parsed capture as JSON: a list of request/response records.
    #[schemars(
        description = "The parsed capture as JSON: a list of request/response records \
                       (method, url, headers, query, body, response)"
    )]
    pub requests: serde_json::Value,
    /// Optional capture-time cookies as a name -> record map.
    #[schemars(description = "Optional capture-time cookies as a name -> record map")]
    pub cookies: Option<serde_json::Value>,
    /// Optional declared input variables: name -> example value.
    #[schemars(description = "Optional declared input variables: name -> example value")]
    pub input_variables: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SessionParams {
    /// The session id returned by retrace_start_session.
    #[schemars(description = "The session id returned by retrace_start_session")]
    pub session_id: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SelectWorkflowParams {
    /// The session id.
    #[schemars(description = "The session id")]
    pub session_id: String,
    /// The workflow id to analyze.
    #[schemars(description = "The workflow id to analyze")]
    pub workflow_id: String,
}

// =============================================================================
// TOOL IMPLEMENTATIONS
// =============================================================================

#[tool_router]
impl RetraceMcp {
    pub fn new(client: RetraceClient) -> Self {
        Self {
            client,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        description = "Start an analysis session from a captured HTTP session and a target action"
    )]
    async fn retrace_start_session(
        &self,
        params: Parameters<StartSessionParams>,
    ) -> Result<CallToolResult, McpError> {
        let StartSessionParams {
            prompt,
            requests,
            cookies,
            input_variables,
        } = params.0;
        let mut body = serde_json::json!({
            "prompt": prompt,
            "requests": requests,
        });
        if let Some(cookies) = cookies {
            body["cookies"] = serde_json::json!({ "cookies": cookies });
        }
        if let Some(inputs) = input_variables {
            body["input_variables"] = inputs;
        }

        match self.client.start_session(body).await {
            Ok(resp) => {
                let session_id = resp
                    .get("session_id")
                    .and_then(|v| v.as_str())
                    .unwrap_or("?");
                let state = resp.get("state").and_then(|v| v.as_str()).unwrap_or("?");
                let workflows = resp
                    .get("workflows")
                    .and_then(|v| v.as_array())
                    .map(|w| format_workflows(w))
                    .unwrap_or_default();
                let text = format!(
                    "Session {session_id} started (state: {state}).\n{workflows}"
                );
                Ok(CallToolResult::success(vec![Content::text(text)]))
            }
            Err(e) => Err(McpError::internal_error(format!("{e}"), None)),
        }
    }

    #[tool(description = "Get session status: state, queue, workflows, unresolved counts, logs")]
    async fn retrace_status(
        &self,
        params: Parameters<SessionParams>,
    ) -> Result<CallToolResult, McpError> {
        match self.client.status(&params.0.session_id).await {
            Ok(resp) => Ok(CallToolResult::success(vec![Content::text(
                format_status_response(&resp),
            )])),
            Err(e) => Err(McpError::internal_error(format!("{e}"), None)),
        }
    }

    #[tool(description = "Select which discovered workflow to analyze")]
    async fn retrace_select_workflow(
        &self,
        params: Parameters<SelectWorkflowParams>,
    ) -> Result<CallToolResult, McpError> {
        let SelectWorkflowParams {
            session_id,
            workflow_id,
        } = params.0;
        match self.client.select_workflow(&session_id, &workflow_id).await {
            Ok(resp) => Ok(CallToolResult::success(vec![Content::text(
                format_process_response(&resp),
            )])),
            Err(e) => Err(McpError::internal_error(format!("{e}"), None)),
        }
    }

    #[tool(description = "Process one node from the session's dependency queue")]
    async fn retrace_process_node(
        &self,
        params: Parameters<SessionParams>,
    ) -> Result<CallToolResult, McpError> {
        match self.client.process_node(&params.0.session_id).await {
            Ok(resp) => Ok(CallToolResult::success(vec![Content::text(
                format_process_response(&resp),
            )])),
            Err(e) => Err(McpError::internal_error(format!("{e}"), None)),
        }
    }

    #[tool(description = "Drive dependency processing until the session is ready or failed")]
    async fn retrace_run_analysis(
        &self,
        params: Parameters<SessionParams>,
    ) -> Result<CallToolResult, McpError> {
        match self.client.run_analysis(&params.0.session_id).await {
            Ok(resp) => Ok(CallToolResult::success(vec![Content::text(
                format_process_response(&resp),
            )])),
            Err(e) => Err(McpError::internal_error(format!("{e}"), None)),
        }
    }

    #[tool(description = "Get the serialized dependency graph (nodes, edges, per-node state)")]
    async fn retrace_get_graph(
        &self,
        params: Parameters<SessionParams>,
    ) -> Result<CallToolResult, McpError> {
        match self.client.graph(&params.0.session_id).await {
            Ok(resp) => {
                let graph = resp.get("graph").cloned().unwrap_or(resp);
                let text = serde_json::to_string_pretty(&graph)
                    .unwrap_or_else(|_| graph.to_string());
                Ok(CallToolResult::success(vec![Content::text(text)]))
            }
            Err(e) => Err(McpError::internal_error(format!("{e}"), None)),
        }
    }

    #[tool(
        description = "Generate the codegen handoff for a completed session (graph + action URL)"
    )]
    async fn retrace_generate(
        &self,
        params: Parameters<SessionParams>,
    ) -> Result<CallToolResult, McpError> {
        match self.client.generate(&params.0.session_id).await {
            Ok(resp) => {
                let action_url = resp
                    .get("action_url")
                    .and_then(|v| v.as_str())
                    .unwrap_or("?");
                let code = resp
                    .get("generated_code")
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                let text = format!("Action URL: {action_url}\n\n{code}");
                Ok(CallToolResult::success(vec![Content::text(text)]))
            }
            Err(e) => Err(McpError::internal_error(format!("{e}"), None)),
        }
    }
}

// =============================================================================
// SERVER HANDLER
// =============================================================================

#[tool_handler]
impl ServerHandler for RetraceMcp {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Retrace dependency-analysis server. Start a session from a captured \
                 HTTP session, inspect discovered workflows, drive dependency \
                 resolution, and fetch the graph or the codegen handoff."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

// =============================================================================
// RESPONSE FORMATTING
// =============================================================================

/// Format the workflow list of a start-session response.
fn format_workflows(workflows: &[serde_json::Value]) -> String {
    if workflows.is_empty() {
        return "No workflows discovered.".to_string();
    }
    let mut parts = vec![format!("Workflows ({}):", workflows.len())];
    for workflow in workflows {
        let id = workflow.get("id").and_then(|v| v.as_str()).unwrap_or("?");
        let name = workflow.get("name").and_then(|v| v.as_str()).unwrap_or("?");
        let category = workflow
            .get("category")
            .and_then(|v| v.as_str())
            .unwrap_or("?");
        let priority = workflow
            .get("priority")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        parts.push(format!("  {id}: {name} [{category}, priority {priority}]"));
    }
    parts.join("\n")
}

/// Format a session status response into human-readable text.
fn format_status_response(resp: &serde_json::Value) -> String {
    let state = resp.get("state").and_then(|v| v.as_str()).unwrap_or("?");
    let queue = resp
        .get("queue_length")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let nodes = resp
        .get("node_count")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let edges = resp
        .get("edge_count")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let unresolved = resp
        .get("unresolved_count")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let complete = resp
        .get("is_complete")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let mut parts = vec![format!(
        "State: {state}\nQueue: {queue}\nGraph: {nodes} nodes, {edges} edges\n\
         Unresolved: {unresolved}\nComplete: {complete}"
    )];

    if let Some(action_url) = resp.get("action_url").and_then(|v| v.as_str()) {
        parts.push(format!("Action URL: {action_url}"));
    }
    if let Some(logs) = resp.get("logs").and_then(|v| v.as_array()) {
        let warnings: Vec<String> = logs
            .iter()
            .filter(|entry| {
                entry.get("level").and_then(|v| v.as_str()) != Some("info")
            })
            .filter_map(|entry| entry.get("message").and_then(|v| v.as_str()))
            .map(|m| format!("  {m}"))
            .collect();
        if !warnings.is_empty() {
            parts.push(format!("Warnings:\n{}", warnings.join("\n")));
        }
    }
    parts.join("\n")
}

/// Format a process/run response into human-readable text.
fn format_process_response(resp: &serde_json::Value) -> String {
    let state = resp.get("state").and_then(|v| v.as_str()).unwrap_or("?");
    let queue = resp
        .get("queue_length")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let unresolved = resp
        .get("unresolved_count")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let complete = resp
        .get("is_complete")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    format!(
        "State: {state}\nQueue: {queue}\nUnresolved: {unresolved}\nComplete: {complete}"
    )
}
