// src/connection/handler.rs

//! Defines the `ConnectionHandler` which manages the full lifecycle of a client session.

use super::guard::ConnectionGuard;
use crate::core::protocol::{LineCodec, ResponseEnvelope};
use crate::core::state::ServerState;
use crate::core::{BridgeError, CommandDispatcher, Dispatch};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

/// The result of waiting for the next request line.
enum ReadOutcome {
    Line(String),
    TooLong(usize),
    Closed,
    Failed(BridgeError),
    Idle,
}

/// What the main loop does after handling one request.
enum NextAction {
    Continue,
    ExitLoop,
}

/// Owns one client connection.
///
/// Requests are strictly sequential: a line is read, fully resolved, and its
/// envelope written before the next line is read. The registry entry is
/// released by the `ConnectionGuard` on every exit path.
pub struct ConnectionHandler<S = TcpStream> {
    framed: Framed<S, LineCodec>,
    addr: SocketAddr,
    state: Arc<ServerState>,
    dispatcher: CommandDispatcher,
    shutdown_rx: broadcast::Receiver<()>,
    idle_timeout: Option<Duration>,
    guard: ConnectionGuard,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a handler for a session that is already registered; `guard`
    /// deregisters it when the handler is dropped.
    pub fn new(
        socket: S,
        addr: SocketAddr,
        state: Arc<ServerState>,
        shutdown_rx: broadcast::Receiver<()>,
        guard: ConnectionGuard,
    ) -> Self {
        let session = &state.config.session;
        let codec = LineCodec::new(session.max_line_length);
        let idle_timeout = (!session.idle_timeout.is_zero()).then_some(session.idle_timeout);
        Self {
            framed: Framed::new(socket, codec),
            addr,
            dispatcher: CommandDispatcher::new(state.clone()),
            state,
            shutdown_rx,
            idle_timeout,
            guard,
        }
    }

    pub fn session_id(&self) -> u64 {
        self.guard.session_id()
    }

    /// The main event loop for the session. Client-side failures end the
    /// session quietly; nothing is propagated past this point.
    pub async fn run(mut self) {
        let session_id = self.session_id();
        info!("Session {} started for {}", session_id, self.addr);

        loop {
            let outcome = tokio::select! {
                // Prioritize close requests over reading.
                biased;
                _ = self.shutdown_rx.recv() => {
                    info!("Session {} for {} asked to close.", session_id, self.addr);
                    break;
                }
                outcome = read_line(&mut self.framed, self.idle_timeout) => outcome,
            };

            let action = match outcome {
                ReadOutcome::Line(line) => self.process_line(&line).await,
                ReadOutcome::TooLong(max) => {
                    warn!(
                        "Session {}: request from {} exceeded {} bytes, closing.",
                        session_id, self.addr, max
                    );
                    let error = BridgeError::LineTooLong(max).to_string();
                    let _ = self.write(ResponseEnvelope::failure(None, error)).await;
                    NextAction::ExitLoop
                }
                ReadOutcome::Closed => {
                    debug!("Connection from {} closed by peer.", self.addr);
                    NextAction::ExitLoop
                }
                ReadOutcome::Failed(e) => {
                    if is_normal_disconnect(&e) {
                        debug!("Connection from {} closed by peer: {}", self.addr, e);
                    } else {
                        warn!("Connection error for {}: {}", self.addr, e);
                    }
                    NextAction::ExitLoop
                }
                ReadOutcome::Idle => {
                    info!(
                        "Session {} for {} idle for {:?}, closing.",
                        session_id, self.addr, self.idle_timeout
                    );
                    NextAction::ExitLoop
                }
            };

            if let NextAction::ExitLoop = action {
                break;
            }
        }

        // Flush anything pending and close our write half; the peer may
        // already be gone.
        let _ = self.framed.close().await;
        info!("Session {} for {} closed.", session_id, self.addr);
    }

    /// Dispatches one line and writes its envelope, if any.
    async fn process_line(&mut self, line: &str) -> NextAction {
        let session_id = self.session_id();
        debug!("Session {}: received '{}'", session_id, line);

        match self.dispatcher.dispatch(line).await {
            Dispatch::NoOp => NextAction::Continue,
            Dispatch::Reply(envelope) => {
                self.state.clients.touch(session_id);
                match self.write(envelope).await {
                    Ok(()) => NextAction::Continue,
                    Err(_) => NextAction::ExitLoop,
                }
            }
            Dispatch::ReplyAndClose(envelope) => {
                self.state.clients.touch(session_id);
                let _ = self.write(envelope).await;
                debug!("Session {}: client requested disconnect.", session_id);
                NextAction::ExitLoop
            }
        }
    }

    async fn write(&mut self, envelope: ResponseEnvelope) -> Result<(), BridgeError> {
        if let Err(e) = self.framed.send(envelope).await {
            if is_normal_disconnect(&e) {
                debug!("Client {} went away before the reply: {}", self.addr, e);
            } else {
                warn!("Failed to write response to {}: {}", self.addr, e);
            }
            return Err(e);
        }
        Ok(())
    }
}

async fn read_line<S>(
    framed: &mut Framed<S, LineCodec>,
    idle_timeout: Option<Duration>,
) -> ReadOutcome
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let next = match idle_timeout {
        Some(limit) => match tokio::time::timeout(limit, framed.next()).await {
            Ok(next) => next,
            Err(_) => return ReadOutcome::Idle,
        },
        None => framed.next().await,
    };

    match next {
        Some(Ok(line)) => ReadOutcome::Line(line),
        Some(Err(BridgeError::LineTooLong(max))) => ReadOutcome::TooLong(max),
        Some(Err(e)) => ReadOutcome::Failed(e),
        None => ReadOutcome::Closed,
    }
}

/// Helper function to check for non-critical disconnection errors.
fn is_normal_disconnect(e: &BridgeError) -> bool {
    matches!(e, BridgeError::Io(io_err) if matches!(
        io_err.kind(),
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionAborted
    ))
}
