//! # Retrace MCP Server
//!
//! Entry point for the MCP (Model Context Protocol) bridge to Retrace.
//!
//! Reads configuration from environment variables:
//! - `RETRACE_URL` — Retrace server URL (default: `http://localhost:8080`)
//! - `RETRACE_API_KEY` — Optional Bearer token for authentication
//!
//! Communicates with AI clients (Claude, GPT) via MCP over stdio,
//! and forwards requests to the Retrace HTTP API.

mod client;
mod server;

use client::RetraceClient;
use rmcp::{ServiceExt, transport::stdio};
use server::RetraceMcp;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logging to stderr only — stdout is reserved for MCP stdio transport.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let url = std::env::var("RETRACE_URL").unwrap_or_else(|_| "http://localhost:8080".into());
    let api_key = std::env::var("RETRACE_API_KEY").ok();

    tracing::info!("Retrace MCP server starting, target: {}", url);

    let client = RetraceClient::new(url, api_key);
    let mcp = RetraceMcp::new(client);

    let service = mcp.serve(stdio()).await.inspect_err(|e| {
        tracing::error!("MCP serve error: {:?}", e);
    })?;

    service.waiting().await?;
    Ok(())
}
