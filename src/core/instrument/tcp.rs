// src/core/instrument/tcp.rs

//! A raw-socket SCPI transport, as exposed by LXI instruments and by
//! USBTMC-to-TCP gateways.

use super::{InstrumentChannel, is_query};
use crate::core::errors::InstrumentError;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// A newline-terminated SCPI session over TCP.
///
/// The socket is opened lazily and dropped after any transport failure, so
/// the next command transparently reconnects.
pub struct TcpInstrument {
    address: String,
    connect_timeout: Duration,
    stream: Option<BufReader<TcpStream>>,
}

impl TcpInstrument {
    pub fn new(address: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            connect_timeout,
            stream: None,
        }
    }

    /// Opens the socket if it is not already open.
    pub async fn connect(&mut self) -> Result<(), InstrumentError> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| {
                InstrumentError::Io(format!(
                    "connection to {} timed out after {} ms",
                    self.address,
                    self.connect_timeout.as_millis()
                ))
            })??;
        stream.set_nodelay(true)?;
        info!("Opened instrument socket to {}", self.address);
        self.stream = Some(BufReader::new(stream));
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.stream.take().is_some() {
            warn!("Dropped instrument socket to {}", self.address);
        }
    }

    /// Throws away bytes that arrived after an earlier query timed out, so a
    /// late reply is never attributed to the next command.
    fn discard_stale(stream: &mut BufReader<TcpStream>) -> Result<(), InstrumentError> {
        let buffered = stream.buffer().len();
        if buffered > 0 {
            debug!("Discarding {} buffered stale bytes from instrument", buffered);
            stream.consume(buffered);
        }

        let mut scratch = [0u8; 512];
        loop {
            match stream.get_ref().try_read(&mut scratch) {
                Ok(0) => {
                    return Err(InstrumentError::Io(
                        "connection closed by instrument".to_string(),
                    ));
                }
                Ok(n) => debug!("Discarding {} stale bytes from instrument", n),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn exchange(
        stream: &mut BufReader<TcpStream>,
        command: &str,
        timeout: Duration,
    ) -> Result<String, InstrumentError> {
        let timed_out = || InstrumentError::Timeout {
            command: command.to_string(),
            timeout,
        };

        let mut frame = Vec::with_capacity(command.len() + 1);
        frame.extend_from_slice(command.as_bytes());
        frame.push(b'\n');
        tokio::time::timeout(timeout, async {
            stream.get_mut().write_all(&frame).await?;
            stream.get_mut().flush().await
        })
        .await
        .map_err(|_| timed_out())??;

        if !is_query(command) {
            return Ok(String::new());
        }

        let mut reply = Vec::new();
        match tokio::time::timeout(timeout, stream.read_until(b'\n', &mut reply)).await {
            Err(_) => Err(timed_out()),
            Ok(Err(e)) => Err(e.into()),
            Ok(Ok(0)) => Err(InstrumentError::Io(
                "connection closed by instrument".to_string(),
            )),
            Ok(Ok(_)) => Ok(String::from_utf8_lossy(&reply).trim().to_string()),
        }
    }
}

#[async_trait]
impl InstrumentChannel for TcpInstrument {
    async fn send(&mut self, command: &str, timeout: Duration) -> Result<String, InstrumentError> {
        self.connect().await?;
        let Some(stream) = self.stream.as_mut() else {
            return Err(InstrumentError::Io("instrument socket is not open".into()));
        };

        let result = match Self::discard_stale(stream) {
            Ok(()) => Self::exchange(stream, command, timeout).await,
            Err(e) => Err(e),
        };
        if matches!(result, Err(InstrumentError::Io(_))) {
            self.disconnect();
        }
        result
    }

    async fn ensure_connected(&mut self) -> Result<(), InstrumentError> {
        self.connect().await
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn address(&self) -> &str {
        &self.address
    }
}
