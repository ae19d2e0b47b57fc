//! # Retrace - Analysis Server
//!
//! The main binary for the Retrace dependency-analysis engine.
//!
//! This application provides the HTTP REST API server (axum-based) over a
//! registry of independent analysis sessions.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                apps/retrace (THE BINARY)             │
//! │                                                      │
//! │   ┌──────────────┐        ┌─────────────────────┐   │
//! │   │   HTTP API   │        │  Session Registry   │   │
//! │   │   (axum)     │──────▶ │  (one orchestrator  │   │
//! │   └──────────────┘        │   per session)      │   │
//! │                           └──────────┬──────────┘   │
//! │                                      ▼              │
//! │                            ┌──────────────────┐     │
//! │                            │   retrace-core   │     │
//! │                            │   (THE LOGIC)    │     │
//! │                            └──────────────────┘     │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! retrace --host 0.0.0.0 --port 8080
//! retrace --config retrace.toml
//! ```

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// SERVER ARGUMENTS & FILE CONFIG
// =============================================================================

/// Retrace - dependency analysis server for captured HTTP sessions.
#[derive(Parser, Debug)]
#[command(name = "retrace")]
#[command(version, about, long_about = None)]
struct Args {
    /// Host to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind to
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Optional TOML configuration file (host/port; flags win)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Suppress banner output
    #[arg(short, long)]
    quiet: bool,
}

/// File-based server configuration.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    host: Option<String>,
    port: Option<u16>,
}

fn load_file_config(path: &PathBuf) -> FileConfig {
    match std::fs::read_to_string(path) {
        Ok(text) => match toml::from_str(&text) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Ignoring malformed config {}: {}", path.display(), e);
                FileConfig::default()
            }
        },
        Err(e) => {
            tracing::warn!("Cannot read config {}: {}", path.display(), e);
            FileConfig::default()
        }
    }
}

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // Initialize tracing — RETRACE_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("RETRACE_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "retrace=info,tower_http=debug".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    let args = Args::parse();

    // Flags override file configuration; file fills the gaps
    let (mut host, mut port) = (args.host.clone(), args.port);
    if let Some(path) = &args.config {
        let file = load_file_config(path);
        if host == "127.0.0.1" {
            if let Some(file_host) = file.host {
                host = file_host;
            }
        }
        if port == 8080 {
            if let Some(file_port) = file.port {
                port = file_port;
            }
        }
    }

    if !args.quiet {
        print_banner();
    }

    let addr = format!("{host}:{port}");
    if let Err(e) = retrace::api::run_server(&addr).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the Retrace startup banner.
fn print_banner() {
    println!(
        r#"
  ██████╗ ███████╗████████╗██████╗  █████╗  ██████╗███████╗
  ██╔══██╗██╔════╝╚══██╔══╝██╔══██╗██╔══██╗██╔════╝██╔════╝
  ██████╔╝█████╗     ██║   ██████╔╝███████║██║     █████╗
  ██╔══██╗██╔══╝     ██║   ██╔══██╗██╔══██║██║     ██╔══╝
  ██║  ██║███████╗   ██║   ██║  ██║██║  ██║╚██████╗███████╗
  ╚═╝  ╚═╝╚══════╝   ╚═╝   ╚═╝  ╚═╝╚═╝  ╚═╝ ╚═════╝╚══════╝

  Capture Replay Analyzer v{}

  Deterministic • Grounded • Replayable
"#,
        env!("CARGO_PKG_VERSION")
    );
}
