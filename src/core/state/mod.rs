// src/core/state/mod.rs

//! Defines the central `ServerState` struct and its components.

mod registry;

pub use registry::{ClientEntry, ClientInfo, ConnectionRegistry, ShutdownSender};

use crate::config::Config;
use crate::core::instrument::{InstrumentChannel, InstrumentLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// The process-wide state shared by every session and background task.
///
/// It holds two independent singletons with their own synchronization: the
/// `InstrumentLock` around the instrument and the `ConnectionRegistry` of open
/// sessions. No operation holds both at once.
pub struct ServerState {
    pub config: Config,
    pub instrument: InstrumentLock,
    pub clients: ConnectionRegistry,
    /// Cleared as soon as shutdown begins.
    is_running: AtomicBool,
}

impl ServerState {
    pub fn new(config: Config, channel: Box<dyn InstrumentChannel>) -> Arc<Self> {
        let instrument = InstrumentLock::new(
            channel,
            config.instrument.command_timeout,
            config.instrument.lock_timeout,
        );
        Arc::new(Self {
            config,
            instrument,
            clients: ConnectionRegistry::new(),
            is_running: AtomicBool::new(true),
        })
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    pub fn set_stopping(&self) {
        self.is_running.store(false, Ordering::Release);
    }
}
