// src/server/spawner.rs

//! Spawns all of the server's long-running background tasks.

use super::context::ServerContext;
use super::metrics_server;
use crate::core::tasks::instrument_probe::InstrumentProbeTask;
use tracing::info;

/// Spawns all background tasks into the context's JoinSet.
pub fn spawn_all(ctx: &mut ServerContext) {
    let state = &ctx.state;
    let shutdown_tx = &ctx.shutdown_tx;
    let background_tasks = &mut ctx.background_tasks;

    // --- Metrics Server ---
    if state.config.metrics.enabled {
        let metrics_state = state.clone();
        let shutdown_rx_metrics = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            metrics_server::run_metrics_server(metrics_state, shutdown_rx_metrics).await
        });
    } else {
        info!("Prometheus metrics server is disabled in the configuration.");
    }

    // --- Instrument Liveness Probe ---
    if state.config.instrument.probe_interval.is_zero() {
        info!("Instrument liveness probe is disabled in the configuration.");
    } else {
        let probe = InstrumentProbeTask::new(state.clone());
        let shutdown_rx_probe = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            probe.run(shutdown_rx_probe).await;
            Ok(())
        });
    }
}
