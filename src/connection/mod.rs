// src/connection/mod.rs

//! Manages the lifecycle of a single client TCP connection: line framing,
//! sequential command processing, and cleanup on disconnect.

mod guard;
mod handler;

pub use guard::ConnectionGuard;
pub use handler::ConnectionHandler;
