// src/core/tasks/instrument_probe.rs

use crate::core::state::ServerState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

/// Periodically checks that the instrument still answers, so that `STATUS`
/// reflects a dropped cable even when no client is sending commands.
///
/// The probe never queues behind client commands: if the lock is held, the
/// instrument is evidently in use and the tick is skipped.
pub struct InstrumentProbeTask {
    state: Arc<ServerState>,
    period: Duration,
    command: String,
}

impl InstrumentProbeTask {
    pub fn new(state: Arc<ServerState>) -> Self {
        let period = state.config.instrument.probe_interval;
        let command = state.config.instrument.probe_command.clone();
        Self {
            state,
            period,
            command,
        }
    }

    /// Runs one probe. Returns `None` when the instrument was busy.
    pub async fn probe_once(&self) -> Option<bool> {
        let result = self.state.instrument.try_send(&self.command).await?;
        match result {
            Ok(reply) => {
                debug!("Instrument probe '{}' -> '{}'", self.command, reply);
                Some(true)
            }
            Err(e) => {
                warn!("Instrument probe '{}' failed: {}", self.command, e);
                Some(false)
            }
        }
    }

    /// Runs the main loop for the probe task.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        if self.period.is_zero() {
            info!("Instrument liveness probe is disabled.");
            return;
        }
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; startup already tried to connect.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.probe_once().await.is_none() {
                        debug!("Instrument busy, skipping liveness probe.");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Instrument probe task shutting down.");
                    return;
                }
            }
        }
    }
}
