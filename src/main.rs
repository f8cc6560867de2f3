//! StashKV server entry point.
//!
//! Recovers the store from disk, starts the background durability tasks and
//! serves the line protocol until Ctrl+C.

use anyhow::Context;
use clap::Parser;
use stashkv::commands::CommandHandler;
use stashkv::connection::{accept_loop, log_stats, ConnectionStats};
use stashkv::persistence::Durability;
use stashkv::ServerConfig;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).init();

    info!(
        version = stashkv::VERSION,
        addr = %config.addr,
        aof = config.aof,
        snapshot = config.snapshot,
        fsync = %config.fsync,
        shards = config.shards,
        "Starting StashKV"
    );

    let (mut durability, report) =
        Durability::open(config.durability()).context("failed to restore state from disk")?;
    info!(
        keys = report.keys,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "State restored"
    );
    durability.start_background();

    let listener = TcpListener::bind(&config.addr)
        .await
        .with_context(|| format!("failed to bind {}", config.addr))?;
    info!(addr = %config.addr, "Listening");

    let stats = Arc::new(ConnectionStats::new());
    let handler = CommandHandler::new(durability.db().clone());

    tokio::select! {
        _ = accept_loop(listener, handler, Arc::clone(&stats)) => {}
        result = signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "Failed to listen for Ctrl+C");
            }
            info!("Shutdown signal received, stopping server...");
        }
    }

    log_stats(&stats);
    durability
        .shutdown()
        .await
        .context("failed to close the append-only file")?;

    info!("Server shutdown complete");
    Ok(())
}
