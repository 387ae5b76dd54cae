// src/core/errors.rs

//! Defines the error types shared by the bridge.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Failures that can occur while talking to the instrument, either while
/// waiting for the instrument lock or during the round-trip itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InstrumentError {
    /// The instrument did not answer within the command timeout.
    #[error("Instrument timeout: no reply to '{command}' within {} ms", .timeout.as_millis())]
    Timeout { command: String, timeout: Duration },

    /// Another session held the instrument for longer than the lock timeout.
    #[error("Timeout waiting for instrument access after {} ms", .0.as_millis())]
    LockTimeout(Duration),

    /// The transport to the instrument failed.
    #[error("Instrument I/O error: {0}")]
    Io(String),
}

impl InstrumentError {
    /// True for both kinds of timeout. Timeouts are transient and never change
    /// the cached connectivity state.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            InstrumentError::Timeout { .. } | InstrumentError::LockTimeout(_)
        )
    }

    /// True if the transport itself failed and the instrument should be
    /// considered disconnected until a later exchange succeeds.
    pub fn is_transport_failure(&self) -> bool {
        matches!(self, InstrumentError::Io(_))
    }

    /// A short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            InstrumentError::Timeout { .. } => "timeout",
            InstrumentError::LockTimeout(_) => "lock_timeout",
            InstrumentError::Io(_) => "io",
        }
    }
}

impl From<std::io::Error> for InstrumentError {
    fn from(e: std::io::Error) -> Self {
        InstrumentError::Io(e.to_string())
    }
}

/// The main error enum for session and server failures.
#[derive(Error, Debug, Clone)]
pub enum BridgeError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Request line exceeds the maximum length of {0} bytes")]
    LineTooLong(usize),

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for BridgeError {
    fn from(e: std::io::Error) -> Self {
        BridgeError::Io(Arc::new(e))
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        BridgeError::Internal(format!("failed to serialize response: {e}"))
    }
}
