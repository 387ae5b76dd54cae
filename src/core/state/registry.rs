// src/core/state/registry.rs

//! Contains the table of active client sessions.

use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::broadcast;

pub type ShutdownSender = broadcast::Sender<()>;

/// Metadata kept for one open session.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub addr: SocketAddr,
    pub session_id: u64,
    pub created: Instant,
    pub last_command_time: Instant,
    pub commands_processed: u64,
}

/// A registry entry: the session's metadata plus the sender used to ask it
/// to close.
#[derive(Debug)]
pub struct ClientEntry {
    pub info: ClientInfo,
    pub shutdown_tx: ShutdownSender,
}

/// A process-wide table of open sessions.
///
/// Safe for concurrent registration and removal from any number of sessions.
/// `count` is a best-effort snapshot and is not transactionally consistent
/// with any other operation.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    clients: DashMap<u64, ClientEntry>,
    next_session_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh, never reused session id.
    pub fn next_session_id(&self) -> u64 {
        self.next_session_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Adds a session and returns the receiver that fires when the session is
    /// asked to close.
    pub fn register(&self, session_id: u64, addr: SocketAddr) -> broadcast::Receiver<()> {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let now = Instant::now();
        self.clients.insert(
            session_id,
            ClientEntry {
                info: ClientInfo {
                    addr,
                    session_id,
                    created: now,
                    last_command_time: now,
                    commands_processed: 0,
                },
                shutdown_tx,
            },
        );
        shutdown_rx
    }

    /// Removes a session. Returns `false` if it was not registered.
    pub fn deregister(&self, session_id: u64) -> bool {
        self.clients.remove(&session_id).is_some()
    }

    pub fn count(&self) -> usize {
        self.clients.len()
    }

    /// Records that a session processed one more request.
    pub fn touch(&self, session_id: u64) {
        if let Some(mut entry) = self.clients.get_mut(&session_id) {
            entry.info.last_command_time = Instant::now();
            entry.info.commands_processed += 1;
        }
    }

    /// Asks every registered session to close and returns how many were
    /// signalled. Each session deregisters itself as it tears down.
    pub fn close_all(&self) -> usize {
        let mut signalled = 0;
        for entry in self.clients.iter() {
            let _ = entry.shutdown_tx.send(());
            signalled += 1;
        }
        signalled
    }

    /// A copy of every session's metadata, ordered by session id.
    pub fn snapshot(&self) -> Vec<ClientInfo> {
        let mut infos: Vec<ClientInfo> = self.clients.iter().map(|e| e.info.clone()).collect();
        infos.sort_by_key(|info| info.session_id);
        infos
    }
}
