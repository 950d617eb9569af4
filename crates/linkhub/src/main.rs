//! # Linkhub MCP Server
//!
//! Model Context Protocol server for AI agents to link and operate messaging
//! sessions.
//!
//! ## Overview
//!
//! This server provides MCP tools for:
//! - Session management (create, link, list, status, disconnect, reconnect, delete)
//! - Messaging (single and bulk text sends)
//! - Observation (wait for QR, pairing code, connection and error events)
//!
//! ## Architecture
//!
//! This is Layer 3 - the main MCP server binary that ties together:
//! - linkhub-core: Core types and configuration
//! - linkhub-engine: Protocol engine bridge
//! - linkhub-session: Session lifecycle

use std::sync::Arc;

use rmcp::{transport::stdio, ServiceExt};

use linkhub::{cli::USAGE, CliOptions, LinkhubMcpServer};
use linkhub_engine::BridgeEngineFactory;
use linkhub_session::SessionManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let options = CliOptions::parse(std::env::args().skip(1))?;
    if options.help {
        println!("{USAGE}");
        return Ok(());
    }

    let config = options.load_config()?;

    // Initialize logging; stdout carries the MCP transport
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.server.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(
        "Linkhub MCP Server v{} starting (max sessions: {}, engine: {})",
        env!("CARGO_PKG_VERSION"),
        config.server.max_sessions,
        config.engine.command
    );

    let factory = Arc::new(BridgeEngineFactory::new(config.engine.clone()));
    let manager = SessionManager::from_config(factory, &config);

    let restored = manager.restore_sessions().await;
    tracing::info!("Restored {} session(s), starting stdio transport...", restored);

    let server = LinkhubMcpServer::new(manager.clone());

    // Serve the MCP server over stdio
    let service = server.serve(stdio()).await.map_err(|e| {
        tracing::error!("Error starting server: {}", e);
        e
    })?;

    tracing::info!("Linkhub MCP Server running on stdio");

    // Wait for the service to complete
    let result = service.waiting().await;

    manager.shutdown();
    tracing::info!("Linkhub MCP Server shutting down");

    result?;
    Ok(())
}
