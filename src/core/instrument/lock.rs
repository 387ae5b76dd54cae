// src/core/instrument/lock.rs

//! Defines `InstrumentLock`, the single permit guarding the instrument channel.

use super::InstrumentChannel;
use crate::core::errors::InstrumentError;
use crate::core::metrics;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Extra time granted to a channel beyond the command timeout before the lock
/// cancels the round-trip itself. Channels are expected to time out on their
/// own first.
const TIMEOUT_GRACE: Duration = Duration::from_millis(250);

/// Serializes all access to the instrument so that at most one `send` is in
/// flight at any time, across all sessions.
///
/// Waiters are queued in FIFO order by `tokio::sync::Mutex`. There is no
/// cross-client fairness beyond that: whichever session acquires the lock next
/// runs next. A waiter that cannot acquire the lock within `lock_timeout`
/// gets `InstrumentError::LockTimeout` and the holder is left undisturbed.
///
/// The last-known connectivity and the address are cached outside the mutex
/// so that `STATUS` never queues behind an in-flight command.
pub struct InstrumentLock {
    channel: Mutex<Box<dyn InstrumentChannel>>,
    address: String,
    connected: AtomicBool,
    command_timeout: Duration,
    lock_timeout: Duration,
}

impl InstrumentLock {
    pub fn new(
        channel: Box<dyn InstrumentChannel>,
        command_timeout: Duration,
        lock_timeout: Duration,
    ) -> Self {
        let address = channel.address().to_string();
        let connected = channel.is_connected();
        metrics::INSTRUMENT_CONNECTED.set(if connected { 1.0 } else { 0.0 });
        Self {
            channel: Mutex::new(channel),
            address,
            connected: AtomicBool::new(connected),
            command_timeout,
            lock_timeout,
        }
    }

    /// Acquires exclusive access, runs `f` with the channel, and releases the
    /// lock when `f`'s future completes or is dropped.
    pub async fn with_instrument<T, F>(&self, f: F) -> Result<T, InstrumentError>
    where
        F: for<'a> FnOnce(&'a mut dyn InstrumentChannel) -> BoxFuture<'a, T>,
    {
        let started = Instant::now();
        let mut guard = tokio::time::timeout(self.lock_timeout, self.channel.lock())
            .await
            .map_err(|_| {
                warn!(
                    "Gave up waiting for the instrument lock after {:?}.",
                    self.lock_timeout
                );
                InstrumentError::LockTimeout(self.lock_timeout)
            })?;
        metrics::LOCK_WAIT_SECONDS.observe(started.elapsed().as_secs_f64());

        Ok(f(&mut **guard).await)
    }

    /// Sends one command to the instrument under the lock and updates the
    /// cached connectivity from the outcome.
    pub async fn send(&self, command: &str) -> Result<String, InstrumentError> {
        let owned = command.to_string();
        let timeout = self.command_timeout;
        let result = self
            .with_instrument(move |channel| {
                Box::pin(async move { round_trip(channel, owned, timeout).await })
            })
            .await
            .and_then(|r| r);
        self.record_outcome(&result);
        result
    }

    /// Like `send`, but only if nobody holds the lock right now. Returns
    /// `None` when the instrument is busy.
    pub async fn try_send(&self, command: &str) -> Option<Result<String, InstrumentError>> {
        let mut guard = self.channel.try_lock().ok()?;
        let result = round_trip(&mut **guard, command.to_string(), self.command_timeout).await;
        drop(guard);
        self.record_outcome(&result);
        Some(result)
    }

    /// Last-known connectivity. Degraded by transport failures, restored by
    /// any successful exchange.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Marks the instrument as disconnected until the next successful exchange.
    pub fn mark_disconnected(&self) {
        self.set_connected(false);
    }

    fn record_outcome(&self, result: &Result<String, InstrumentError>) {
        match result {
            Ok(_) => self.set_connected(true),
            Err(e) => {
                metrics::INSTRUMENT_ERRORS_TOTAL
                    .with_label_values(&[e.kind()])
                    .inc();
                if e.is_transport_failure() {
                    self.mark_disconnected();
                }
            }
        }
    }

    fn set_connected(&self, connected: bool) {
        let previous = self.connected.swap(connected, Ordering::AcqRel);
        if previous != connected {
            metrics::INSTRUMENT_CONNECTED.set(if connected { 1.0 } else { 0.0 });
            if connected {
                info!("Instrument at {} is reachable again.", self.address);
            } else {
                warn!("Instrument at {} marked as disconnected.", self.address);
            }
        }
    }
}

/// One bounded exchange with the channel.
async fn round_trip(
    channel: &mut dyn InstrumentChannel,
    command: String,
    timeout: Duration,
) -> Result<String, InstrumentError> {
    let started = Instant::now();
    // Bounded by the channel's own connect timeout, not the command timeout.
    channel.ensure_connected().await?;
    let result = match tokio::time::timeout(timeout + TIMEOUT_GRACE, channel.send(&command, timeout))
        .await
    {
        Ok(result) => result,
        Err(_) => Err(InstrumentError::Timeout {
            command: command.clone(),
            timeout,
        }),
    };
    metrics::INSTRUMENT_ROUNDTRIP_SECONDS.observe(started.elapsed().as_secs_f64());
    debug!(
        "Instrument round-trip for '{}' took {:?}: {:?}",
        command,
        started.elapsed(),
        result
    );
    result.map(|reply| reply.trim().to_string())
}
