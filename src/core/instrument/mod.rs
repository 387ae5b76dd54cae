// src/core/instrument/mod.rs

//! The boundary to the physical instrument and the lock that serializes
//! access to it.

mod lock;
mod simulated;
mod tcp;

pub use lock::InstrumentLock;
pub use simulated::{Fault, SimulatedInstrument, SimulatorHandle};
pub use tcp::TcpInstrument;

use crate::config::{InstrumentConfig, InstrumentKind};
use crate::core::errors::InstrumentError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{info, warn};

/// A synchronous, one-command-at-a-time transport to an instrument.
///
/// Implementations never need their own locking: the bridge only ever calls
/// them from inside `InstrumentLock`.
#[async_trait]
pub trait InstrumentChannel: Send {
    /// Writes `command` and, for queries, waits up to `timeout` for one reply
    /// line. Timeouts and transport failures must be reported as distinct
    /// `InstrumentError` variants.
    async fn send(&mut self, command: &str, timeout: Duration) -> Result<String, InstrumentError>;

    /// Opens the transport if it is closed. Called before every `send`,
    /// outside the command timeout, so a slow connect surfaces as a
    /// transport failure rather than a missing reply.
    async fn ensure_connected(&mut self) -> Result<(), InstrumentError> {
        Ok(())
    }

    /// Whether the transport currently believes it is connected.
    fn is_connected(&self) -> bool;

    /// A human-readable address, reported by `STATUS`.
    fn address(&self) -> &str;
}

/// SCPI queries end their header with `?` and produce exactly one reply line.
/// Everything else is a write with no reply.
pub fn is_query(command: &str) -> bool {
    command.contains('?')
}

/// Builds the channel described by the configuration. A TCP instrument that
/// cannot be reached yet is still returned; it reconnects on first use.
pub async fn open(config: &InstrumentConfig) -> Box<dyn InstrumentChannel> {
    match config.kind {
        InstrumentKind::Simulated => {
            info!("Using simulated instrument at '{}'.", config.address);
            Box::new(SimulatedInstrument::new(config.address.clone()))
        }
        InstrumentKind::Tcp => {
            let mut channel = TcpInstrument::new(config.address.clone(), config.connect_timeout);
            match channel.connect().await {
                Ok(()) => info!("Connected to instrument at {}.", config.address),
                Err(e) => warn!(
                    "Instrument at {} is not reachable yet ({}). Will retry on first command.",
                    config.address, e
                ),
            }
            Box::new(channel)
        }
    }
}
