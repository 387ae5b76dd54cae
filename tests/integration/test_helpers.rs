// tests/integration/test_helpers.rs

//! Test helpers and utilities for integration tests

use scpi_bridge::Server;
use scpi_bridge::config::{Config, InstrumentKind};
use scpi_bridge::core::ResponseEnvelope;
use scpi_bridge::core::instrument::{SimulatedInstrument, SimulatorHandle};
use scpi_bridge::core::state::ServerState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// How long a test waits for any single reply before failing.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

pub const SIM_ADDRESS: &str = "192.168.1.50:5555";

/// A running bridge backed by a simulated electronic load.
pub struct TestContext {
    pub addr: SocketAddr,
    pub state: Arc<ServerState>,
    pub sim: SimulatorHandle,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server_task: JoinHandle<()>,
}

impl TestContext {
    /// Starts a bridge with short timeouts suitable for tests.
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: Config) -> Self {
        Self::with_instrument(config, SimulatedInstrument::new(SIM_ADDRESS)).await
    }

    pub async fn with_instrument(config: Config, sim: SimulatedInstrument) -> Self {
        init_tracing();

        let sim_handle = sim.handle();
        let server = Server::bind(config, Box::new(sim))
            .await
            .expect("Failed to bind test server");
        let addr = server.local_addr().expect("Failed to read local address");
        let state = server.state();

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server_task = tokio::spawn(server.serve(async move {
            let _ = shutdown_rx.await;
        }));

        Self {
            addr,
            state,
            sim: sim_handle,
            shutdown_tx: Some(shutdown_tx),
            server_task,
        }
    }

    pub async fn connect(&self) -> TestClient {
        let stream = TcpStream::connect(self.addr)
            .await
            .expect("Failed to connect to test server");
        let (read, write) = stream.into_split();
        TestClient {
            reader: BufReader::new(read),
            writer: write,
        }
    }

    /// Connects and waits until the server has registered the session.
    pub async fn connect_registered(&self) -> TestClient {
        let before = self.state.clients.count();
        let client = self.connect().await;
        self.wait_for_clients(before + 1).await;
        client
    }

    /// Polls the registry until it holds exactly `expected` sessions.
    pub async fn wait_for_clients(&self, expected: usize) {
        let result = tokio::time::timeout(REPLY_TIMEOUT, async {
            while self.state.clients.count() != expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(
            result.is_ok(),
            "expected {expected} registered sessions, found {}",
            self.state.clients.count()
        );
    }

    /// Triggers graceful shutdown and waits for the server to return.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        tokio::time::timeout(Duration::from_secs(10), &mut self.server_task)
            .await
            .expect("Server did not shut down in time")
            .expect("Server task panicked");
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some() {
            self.server_task.abort();
        }
    }
}

/// A line-oriented client speaking the bridge protocol.
pub struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer
            .write_all(bytes)
            .await
            .expect("Failed to write to server");
    }

    pub async fn send_line(&mut self, line: &str) {
        self.send_raw(format!("{line}\n").as_bytes()).await;
    }

    /// Half-closes the connection, as a client does after its last request.
    pub async fn finish_writing(&mut self) {
        self.writer
            .shutdown()
            .await
            .expect("Failed to shut down write half");
    }

    /// Sends one line and waits for its envelope.
    pub async fn request(&mut self, line: &str) -> ResponseEnvelope {
        self.send_line(line).await;
        self.read_envelope()
            .await
            .unwrap_or_else(|| panic!("Connection closed before reply to '{line}'"))
    }

    /// Reads the next envelope, or `None` if the server closed the connection.
    pub async fn read_envelope(&mut self) -> Option<ResponseEnvelope> {
        let mut line = String::new();
        let read = tokio::time::timeout(REPLY_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("Timed out waiting for a reply");
        match read {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(
                serde_json::from_str(line.trim_end())
                    .unwrap_or_else(|e| panic!("Invalid envelope {line:?}: {e}")),
            ),
        }
    }

    /// True once the server has closed the connection and nothing else is
    /// pending.
    pub async fn is_closed(&mut self) -> bool {
        self.read_envelope().await.is_none()
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.host = "127.0.0.1".to_string();
    config.port = 0;
    config.instrument.kind = InstrumentKind::Simulated;
    config.instrument.address = SIM_ADDRESS.to_string();
    config.instrument.command_timeout = Duration::from_millis(200);
    config.instrument.lock_timeout = Duration::from_secs(2);
    config.instrument.probe_interval = Duration::ZERO;
    config
}

fn init_tracing() {
    // Ignore the error if another test already installed a subscriber.
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::new("warn"))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}
