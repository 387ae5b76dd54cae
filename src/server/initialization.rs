// src/server/initialization.rs

//! Builds the shared state and binds the listening socket.

use super::context::ServerContext;
use crate::config::Config;
use crate::core::instrument::InstrumentChannel;
use crate::core::state::ServerState;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Initializes all server components before starting the main loop.
///
/// Returns only once the listening socket is bound.
pub async fn setup(config: Config, channel: Box<dyn InstrumentChannel>) -> Result<ServerContext> {
    log_startup_info(&config);

    let (shutdown_tx, _) = broadcast::channel(1);
    let listen_addr = config.listen_addr();
    let max_clients = config.max_clients;

    let state = ServerState::new(config, channel);
    info!("Server state initialized.");

    let listener = TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("Failed to bind to {listen_addr}"))?;
    info!(
        "SCPI bridge listening on {}",
        listener.local_addr().map_or(listen_addr, |a| a.to_string())
    );

    Ok(ServerContext {
        state,
        listener,
        shutdown_tx,
        background_tasks: JoinSet::new(),
        connection_permits: Arc::new(Semaphore::new(max_clients)),
    })
}

/// Logs key configuration parameters at startup.
fn log_startup_info(config: &Config) {
    let instrument = &config.instrument;
    info!(
        "Instrument: {:?} at {} (command timeout {:?}, lock timeout {:?}).",
        instrument.kind, instrument.address, instrument.command_timeout, instrument.lock_timeout
    );
    if instrument.lock_timeout < instrument.command_timeout {
        warn!(
            "instrument.lock_timeout ({:?}) is shorter than instrument.command_timeout ({:?}); \
             sessions may give up while another session's command is still legitimately running.",
            instrument.lock_timeout, instrument.command_timeout
        );
    }
    info!("Accepting up to {} concurrent clients.", config.max_clients);
}
