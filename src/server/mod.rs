// src/server/mod.rs

//! The TCP front end: binds the listener, runs the accept loop, and owns
//! graceful shutdown.

use crate::config::Config;
use crate::core::instrument::{self, InstrumentChannel};
use crate::core::state::ServerState;
use anyhow::{Context, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tracing::info;

mod connection_loop;
mod context;
mod initialization;
mod metrics_server;
mod spawner;

use context::ServerContext;

/// A bound bridge server.
///
/// Binding and serving are separate steps so callers (and tests) can learn
/// the listening address before any client connects.
pub struct Server {
    ctx: ServerContext,
}

impl Server {
    /// Builds the shared state around `channel` and binds the listener.
    pub async fn bind(config: Config, channel: Box<dyn InstrumentChannel>) -> Result<Self> {
        let ctx = initialization::setup(config, channel).await?;
        Ok(Self { ctx })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.ctx
            .listener
            .local_addr()
            .context("Failed to read listener address")
    }

    pub fn state(&self) -> Arc<ServerState> {
        self.ctx.state.clone()
    }

    /// Serves clients until `shutdown` resolves, then closes every session
    /// and stops background tasks before returning.
    pub async fn serve<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        spawner::spawn_all(&mut self.ctx);
        connection_loop::run(self.ctx, shutdown).await;
    }
}

/// The main server startup function used by the binary: opens the configured
/// instrument, binds, and serves until SIGINT or SIGTERM.
pub async fn run(config: Config) -> Result<()> {
    let shutdown = shutdown_signal()?;
    let channel = instrument::open(&config.instrument).await;
    let server = Server::bind(config, channel).await?;
    server.serve(shutdown).await;
    Ok(())
}

fn shutdown_signal() -> Result<impl Future<Output = ()> + Send> {
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    Ok(async move {
        tokio::select! {
            _ = sigint.recv() => info!("SIGINT received, initiating graceful shutdown."),
            _ = sigterm.recv() => info!("SIGTERM received, initiating graceful shutdown."),
        }
    })
}
