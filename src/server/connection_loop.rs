// src/server/connection_loop.rs

//! Contains the main server loop for accepting connections and handling graceful shutdown.

use super::context::ServerContext;
use crate::connection::{ConnectionGuard, ConnectionHandler};
use crate::core::metrics;
use crate::core::protocol::{LineCodec, ResponseEnvelope};
use crate::core::state::ServerState;
use futures::SinkExt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

/// How long background tasks get to stop after all sessions are gone.
const BACKGROUND_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// The main server loop that accepts connections and handles graceful shutdown.
pub async fn run<F>(mut ctx: ServerContext, shutdown: F)
where
    F: Future<Output = ()> + Send,
{
    let mut client_tasks: JoinSet<()> = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                info!("Shutdown requested, initiating graceful shutdown.");
                break;
            }

            Some(res) = ctx.background_tasks.join_next() => {
                match res {
                    Ok(Ok(())) => warn!("A background task finished unexpectedly without an error."),
                    Ok(Err(e)) => { error!("CRITICAL: Background task failed: {}. Shutting down.", e); break; }
                    Err(e) => { error!("CRITICAL: Background task panicked: {e:?}. Shutting down."); break; }
                }
            },

            res = ctx.listener.accept() => {
                match res {
                    Ok((socket, addr)) => accept_connection(
                        &ctx.state,
                        &ctx.connection_permits,
                        &mut client_tasks,
                        socket,
                        addr,
                    ),
                    Err(e) => error!("Failed to accept connection: {}", e),
                }
            },

            Some(res) = client_tasks.join_next() => {
                if let Err(e) = res
                    && e.is_panic()
                {
                    error!("A client handler panicked: {e:?}");
                }
            },
        }
    }

    // Stop accepting before asking sessions to close so no new session can
    // slip in behind the close signal.
    drop(ctx.listener);
    ctx.state.set_stopping();

    for info in ctx.state.clients.snapshot() {
        debug!(
            "Closing session {} for {} (open {:?}, idle {:?}, {} commands).",
            info.session_id,
            info.addr,
            info.created.elapsed(),
            info.last_command_time.elapsed(),
            info.commands_processed
        );
    }
    let signalled = ctx.state.clients.close_all();
    info!("Shutting down. Asked {} open session(s) to close.", signalled);

    // A session may be waiting on the instrument; give it long enough to get
    // the lock and finish its command before aborting it.
    let instrument = &ctx.state.config.instrument;
    let session_drain = instrument.lock_timeout + instrument.command_timeout + Duration::from_secs(1);
    if tokio::time::timeout(session_drain, async {
        while client_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for sessions to close; aborting the rest.");
        client_tasks.shutdown().await;
    }
    info!("All client connections closed.");

    if ctx.shutdown_tx.send(()).is_err() {
        debug!("No background task was listening for the shutdown signal.");
    }

    info!("Waiting for background tasks to finish...");
    if tokio::time::timeout(BACKGROUND_DRAIN_TIMEOUT, async {
        while ctx.background_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for background tasks to finish cleanly.");
        ctx.background_tasks.shutdown().await;
    };
    info!("Server shutdown complete.");
}

/// Registers an accepted socket and spawns its session, or turns it away
/// when the connection limit is reached.
fn accept_connection(
    state: &Arc<ServerState>,
    permits: &Arc<Semaphore>,
    client_tasks: &mut JoinSet<()>,
    socket: TcpStream,
    addr: SocketAddr,
) {
    metrics::CONNECTIONS_RECEIVED_TOTAL.inc();

    let Ok(permit) = permits.clone().try_acquire_owned() else {
        let max_clients = state.config.max_clients;
        warn!(
            "Rejecting connection from {}: limit of {} clients reached.",
            addr, max_clients
        );
        metrics::CONNECTIONS_REJECTED_TOTAL.inc();
        client_tasks.spawn(reject(socket, addr, max_clients));
        return;
    };

    info!("Accepted new connection from: {}", addr);
    if let Err(e) = socket.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
    }

    let session_id = state.clients.next_session_id();
    let shutdown_rx = state.clients.register(session_id, addr);
    let guard = ConnectionGuard::new(state.clone(), session_id, addr, Some(permit));
    let handler = ConnectionHandler::new(socket, addr, state.clone(), shutdown_rx, guard);
    client_tasks.spawn(handler.run());
}

/// Writes a single failure envelope with no command and closes the socket.
async fn reject(socket: TcpStream, addr: SocketAddr, max_clients: usize) {
    let mut framed = Framed::new(socket, LineCodec::default());
    let envelope = ResponseEnvelope::failure(
        None,
        format!("Server busy: maximum of {max_clients} clients reached"),
    );
    if let Err(e) = framed.send(envelope).await {
        debug!("Failed to notify rejected client {}: {}", addr, e);
    }
    let _ = framed.close().await;
}
