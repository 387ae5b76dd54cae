// src/connection/guard.rs

//! Defines `ConnectionGuard`, an RAII guard for connection resource management.

use crate::core::metrics;
use crate::core::state::ServerState;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::OwnedSemaphorePermit;
use tracing::debug;

/// An RAII guard that removes a session from the `ConnectionRegistry` when it
/// goes out of scope, whichever way the session ends: end-of-stream, socket
/// error, `QUIT`, server shutdown, or task abort.
pub struct ConnectionGuard {
    state: Arc<ServerState>,
    session_id: u64,
    addr: SocketAddr,
    /// Counts against `max_clients` for as long as the session lives.
    permit: Option<OwnedSemaphorePermit>,
}

impl ConnectionGuard {
    /// Creates a guard for a session that the caller has already registered.
    pub fn new(
        state: Arc<ServerState>,
        session_id: u64,
        addr: SocketAddr,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Self {
        metrics::CONNECTED_CLIENTS.inc();
        Self {
            state,
            session_id,
            addr,
            permit,
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        metrics::CONNECTED_CLIENTS.dec();
        // The slot is free by the time the registry count drops.
        drop(self.permit.take());
        debug!(
            "ConnectionGuard dropping, cleaning up resources for connection {}",
            self.addr
        );

        if !self.state.clients.deregister(self.session_id) {
            debug!(
                "Session {} for {} was already gone from the registry.",
                self.session_id, self.addr
            );
        }
    }
}
