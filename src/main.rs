//! RespKV server entry point.
//!
//! Parses the command line, sets up logging, builds the storage engine and
//! serves connections until Ctrl+C.

use anyhow::Context;
use clap::Parser;
use respkv::config::Config;
use respkv::connection::ConnectionStats;
use respkv::server::accept_loop;
use respkv::storage::{ExpirySweeper, StorageEngine};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // RUST_LOG wins over --log-level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("invalid --log-level filter")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(version = respkv::VERSION, "Starting RespKV");

    // Shared across all connections
    let storage = Arc::new(StorageEngine::new());

    // Keep the handle alive for the whole run; dropping it stops the sweeper
    let _sweeper = match config.expiry_config() {
        Some(expiry) => Some(ExpirySweeper::start(Arc::clone(&storage), expiry)),
        None => {
            warn!("Background expiry sweeper disabled");
            None
        }
    };

    let stats = Arc::new(ConnectionStats::new());

    let listener = TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_address()))?;
    info!("Listening on {}", config.bind_address());

    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received, stopping server...");
    };

    tokio::select! {
        _ = accept_loop(listener, Arc::clone(&storage), Arc::clone(&stats)) => {}
        _ = shutdown => {}
    }

    info!(
        connections = stats.connections_accepted.load(Ordering::Relaxed),
        commands = stats.commands_processed.load(Ordering::Relaxed),
        keys = storage.len(),
        "Server shutdown complete"
    );
    Ok(())
}
