//! Thin binary: load config, build the pipeline, serve health/metrics, and
//! shut down gracefully (spec.md §A.1/§B.1 -- the transport carrying actual
//! `ToolCall`s in and `ToolResponse`s out is left to the embedding caller).

mod http;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use audit::{
    AuditLogger,
    TracingAuditSink,
};
use clap::Parser;
use remote_client::MockRemoteClient;
use sheet_common::config::PipelineConfig;
use sheet_tool_core::ToolCore;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "sheet_tool_server", about = "Spreadsheet tool-call pipeline server")]
struct Args {
    /// Path to a JSON file overriding `PipelineConfig` defaults.
    #[arg(long, env = "SHEET_TOOL_CONFIG")]
    config: Option<PathBuf>,

    /// Address the health/metrics endpoint listens on.
    #[arg(long, env = "SHEET_TOOL_BIND", default_value = "0.0.0.0:8080")]
    bind: SocketAddr,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<PipelineConfig> {
    match path {
        Some(path) => {
            let contents = std::fs::read_to_string(path).with_context(|| format!("reading config at {}", path.display()))?;
            serde_json::from_str(&contents).with_context(|| format!("parsing config at {}", path.display()))
        },
        None => Ok(PipelineConfig::default()),
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;
    tracing::info!(bind = %args.bind, "starting sheet_tool_server");

    // `MockRemoteClient` is the only `RemoteClient` this workspace ships; a
    // real deployment swaps it for an HTTP-backed implementation of the
    // same trait without touching the pipeline.
    let client: remote_client::SharedRemoteClient = Arc::new(MockRemoteClient::new());
    let snapshots = Arc::new(snapshot::SnapshotStore::new(config.snapshot.clone(), client.clone()));
    let audit = AuditLogger::new(Arc::new(TracingAuditSink));
    let _pipeline = Arc::new(ToolCore::new(config, client, snapshots, audit));

    let app = http::router();
    let listener = tokio::net::TcpListener::bind(args.bind).await.with_context(|| format!("binding {}", args.bind))?;

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await.context("serving http")?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutting down sheet_tool_server");
}
