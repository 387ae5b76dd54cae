// src/core/mod.rs

//! The central module containing the bridge's core logic and data structures.

pub mod commands;
pub mod dispatcher;
pub mod errors;
pub mod instrument;
pub mod metrics;
pub mod protocol;
pub mod state;
pub mod tasks;

pub use commands::CommandKind;
pub use dispatcher::{CommandDispatcher, Dispatch};
pub use errors::{BridgeError, InstrumentError};
pub use protocol::ResponseEnvelope;
