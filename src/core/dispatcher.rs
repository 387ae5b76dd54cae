// src/core/dispatcher.rs

//! Turns one request line into a response envelope.

use crate::core::commands::CommandKind;
use crate::core::metrics;
use crate::core::protocol::{ResponseEnvelope, ServerStatus};
use crate::core::state::ServerState;
use std::sync::Arc;
use tracing::{debug, warn};

/// Acknowledgement sent in reply to `QUIT`/`EXIT`.
pub const QUIT_ACK: &str = "Goodbye";

/// What the session should do with the result of a dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Write the envelope and keep reading.
    Reply(ResponseEnvelope),
    /// Write the envelope, then close the session.
    ReplyAndClose(ResponseEnvelope),
    /// Blank input: write nothing and keep reading.
    NoOp,
}

impl Dispatch {
    pub fn envelope(&self) -> Option<&ResponseEnvelope> {
        match self {
            Dispatch::Reply(env) | Dispatch::ReplyAndClose(env) => Some(env),
            Dispatch::NoOp => None,
        }
    }
}

/// Classifies request lines and executes them against the shared state.
///
/// Pass-through commands are forwarded opaquely; no SCPI validation happens
/// here. Instrument failures never escape as errors, they become envelope
/// fields.
#[derive(Clone)]
pub struct CommandDispatcher {
    state: Arc<ServerState>,
}

impl CommandDispatcher {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }

    pub async fn dispatch(&self, raw: &str) -> Dispatch {
        let Some(kind) = CommandKind::parse(raw) else {
            return Dispatch::NoOp;
        };
        let line = raw.trim();
        metrics::COMMANDS_PROCESSED_TOTAL.inc();

        match kind {
            CommandKind::ServerStatus => {
                Dispatch::Reply(ResponseEnvelope::success(line, self.status()))
            }
            CommandKind::ServerQuit => {
                Dispatch::ReplyAndClose(ResponseEnvelope::success(line, QUIT_ACK))
            }
            CommandKind::Passthrough(text) => {
                // The lock degrades cached connectivity on transport failures.
                match self.state.instrument.send(&text).await {
                    Ok(reply) => {
                        debug!("'{}' -> '{}'", text, reply);
                        Dispatch::Reply(ResponseEnvelope::success(line, reply))
                    }
                    Err(e) => {
                        warn!("Command '{}' failed: {}", text, e);
                        Dispatch::Reply(ResponseEnvelope::failure(Some(line.to_string()), e.to_string()))
                    }
                }
            }
        }
    }

    /// A snapshot of bridge and instrument state. Never waits on the
    /// instrument lock.
    pub fn status(&self) -> ServerStatus {
        ServerStatus {
            server_running: self.state.is_running(),
            instrument_connected: self.state.instrument.is_connected(),
            instrument_address: self.state.instrument.address().to_string(),
            active_connections: self.state.clients.count(),
        }
    }
}
