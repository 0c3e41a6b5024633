//! Memory Keeper MCP server binary.
//!
//! Logs go to stderr; stdout carries protocol messages only.

use std::sync::Arc;

use anyhow::Result;
use keeper_context_store::{ContextEngine, KeeperConfig};
use keeper_mcp_server::McpServer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let config = KeeperConfig::from_env()?;
    info!(
        "Starting Memory Keeper MCP server ({} backend in {})",
        config.backend,
        config.data_dir.display()
    );

    let engine = ContextEngine::open(config).await?;
    McpServer::new(Arc::new(engine)).run().await
}
