// src/core/instrument/simulated.rs

//! An in-process stand-in for a DC electronic load, used for demo mode and
//! tests. It speaks the small subset of SCPI that monitoring clients use and
//! supports fault injection.

use super::{InstrumentChannel, is_query};
use crate::core::errors::InstrumentError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;

const IDENTITY: &str = "RIGOL TECHNOLOGIES,DL3021,SIM0000000001,00.01.02.00.01";
/// Open-circuit voltage of the simulated source.
const SOURCE_VOLTAGE: f64 = 12.6;
/// Internal resistance of the simulated source, in ohms.
const SOURCE_RESISTANCE: f64 = 0.05;
const MAX_CURRENT: f64 = 40.0;
const UNDEFINED_HEADER: &str = "-113,\"Undefined header\"";
const DATA_OUT_OF_RANGE: &str = "-222,\"Data out of range\"";

/// A failure to inject into the next command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The instrument never answers; the command times out.
    Timeout,
    /// The transport fails, as if the cable were pulled.
    Io,
}

#[derive(Debug)]
struct LoadState {
    input_on: bool,
    function: String,
    current_setpoint: f64,
    error_queue: VecDeque<String>,
}

impl Default for LoadState {
    fn default() -> Self {
        Self {
            input_on: false,
            function: "CC".to_string(),
            current_setpoint: 0.0,
            error_queue: VecDeque::new(),
        }
    }
}

impl LoadState {
    fn load_current(&self) -> f64 {
        if self.input_on {
            self.current_setpoint
        } else {
            0.0
        }
    }

    fn terminal_voltage(&self) -> f64 {
        SOURCE_VOLTAGE - self.load_current() * SOURCE_RESISTANCE
    }

    fn push_error(&mut self, error: &str) {
        self.error_queue.push_back(error.to_string());
    }

    /// Executes one command and returns the reply line (empty for writes).
    fn execute(&mut self, command: &str) -> String {
        let upper = command.trim().to_ascii_uppercase();
        let (header, arg) = match upper.split_once(char::is_whitespace) {
            Some((h, a)) => (h.to_string(), a.trim().to_string()),
            None => (upper.clone(), String::new()),
        };
        let query = is_query(&header);
        let header = normalize_header(header.trim_end_matches('?'));

        match (header.as_str(), query) {
            ("*IDN", true) => IDENTITY.to_string(),
            ("*RST", false) => {
                let errors = std::mem::take(&mut self.error_queue);
                *self = LoadState {
                    error_queue: errors,
                    ..LoadState::default()
                };
                String::new()
            }
            ("*CLS", false) => {
                self.error_queue.clear();
                String::new()
            }
            ("*OPC", true) => "1".to_string(),
            ("INP" | "INP:STAT", true) => (if self.input_on { "1" } else { "0" }).to_string(),
            ("INP" | "INP:STAT", false) => {
                match arg.as_str() {
                    "ON" | "1" => self.input_on = true,
                    "OFF" | "0" => self.input_on = false,
                    _ => self.push_error(DATA_OUT_OF_RANGE),
                }
                String::new()
            }
            ("FUNC", true) => self.function.clone(),
            ("FUNC", false) => {
                match arg.as_str() {
                    "CC" | "CV" | "CR" | "CP" => self.function = arg.clone(),
                    "CURR" => self.function = "CC".to_string(),
                    "VOLT" => self.function = "CV".to_string(),
                    "RES" => self.function = "CR".to_string(),
                    "POW" => self.function = "CP".to_string(),
                    _ => self.push_error(DATA_OUT_OF_RANGE),
                }
                String::new()
            }
            ("CURR" | "CURR:LEV", true) => format!("{:.6}", self.current_setpoint),
            ("CURR" | "CURR:LEV", false) => {
                match arg.parse::<f64>() {
                    Ok(v) if (0.0..=MAX_CURRENT).contains(&v) => self.current_setpoint = v,
                    _ => self.push_error(DATA_OUT_OF_RANGE),
                }
                String::new()
            }
            ("MEAS:VOLT", true) => format!("{:.6}", self.terminal_voltage()),
            ("MEAS:CURR", true) => format!("{:.6}", self.load_current()),
            ("MEAS:POW", true) => {
                format!("{:.6}", self.terminal_voltage() * self.load_current())
            }
            ("SYST:ERR", true) => self
                .error_queue
                .pop_front()
                .unwrap_or_else(|| "0,\"No error\"".to_string()),
            (_, query) => {
                self.push_error(UNDEFINED_HEADER);
                if query {
                    debug!("Simulator received unknown query '{}'", command);
                }
                String::new()
            }
        }
    }
}

/// Strips the leading colon and the optional `SOUR`/`SOURCE` root so that
/// `:SOUR:CURR` and `CURR` land on the same handler.
fn normalize_header(header: &str) -> String {
    let header = header.trim_start_matches(':');
    let header = header
        .strip_prefix("SOURCE:")
        .or_else(|| header.strip_prefix("SOUR:"))
        .unwrap_or(header);
    header
        .replace("INPUT", "INP")
        .replace("STATE", "STAT")
        .replace("FUNCTION", "FUNC")
        .replace("CURRENT", "CURR")
        .replace("LEVEL", "LEV")
        .replace("MEASURE", "MEAS")
        .replace("VOLTAGE", "VOLT")
        .replace("POWER", "POW")
        .replace("SYSTEM", "SYST")
        .replace("ERROR", "ERR")
}

#[derive(Debug, Default)]
struct SimulatorShared {
    state: Mutex<LoadState>,
    pending_fault: Mutex<Option<Fault>>,
    latency: Mutex<Duration>,
    disconnected: AtomicBool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    log: Mutex<Vec<String>>,
}

/// Decrements the in-flight counter even if the round-trip is cancelled.
struct InFlight<'a>(&'a SimulatorShared);

impl<'a> InFlight<'a> {
    fn enter(shared: &'a SimulatorShared) -> Self {
        let now = shared.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        shared.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(shared)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A simulated electronic load.
pub struct SimulatedInstrument {
    address: String,
    shared: Arc<SimulatorShared>,
}

impl SimulatedInstrument {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            shared: Arc::new(SimulatorShared::default()),
        }
    }

    /// Sets a simulated per-command latency.
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.shared.latency.lock() = latency;
        self
    }

    /// Returns a handle for fault injection and inspection that stays valid
    /// after the instrument has been moved into the bridge.
    pub fn handle(&self) -> SimulatorHandle {
        SimulatorHandle {
            shared: self.shared.clone(),
        }
    }
}

#[async_trait]
impl InstrumentChannel for SimulatedInstrument {
    async fn send(&mut self, command: &str, timeout: Duration) -> Result<String, InstrumentError> {
        let _in_flight = InFlight::enter(&self.shared);
        self.shared.log.lock().push(command.to_string());

        let latency = *self.shared.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let fault = self.shared.pending_fault.lock().take();
        match fault {
            Some(Fault::Timeout) => {
                tokio::time::sleep(timeout).await;
                return Err(InstrumentError::Timeout {
                    command: command.to_string(),
                    timeout,
                });
            }
            Some(Fault::Io) => {
                self.shared.disconnected.store(true, Ordering::SeqCst);
                return Err(InstrumentError::Io(
                    "simulated transport failure".to_string(),
                ));
            }
            None => {}
        }

        self.shared.disconnected.store(false, Ordering::SeqCst);
        Ok(self.shared.state.lock().execute(command))
    }

    fn is_connected(&self) -> bool {
        !self.shared.disconnected.load(Ordering::SeqCst)
    }

    fn address(&self) -> &str {
        &self.address
    }
}

/// Shared view onto a `SimulatedInstrument`.
#[derive(Clone)]
pub struct SimulatorHandle {
    shared: Arc<SimulatorShared>,
}

impl SimulatorHandle {
    /// Makes the next command fail with `fault`.
    pub fn inject(&self, fault: Fault) {
        *self.shared.pending_fault.lock() = Some(fault);
    }

    /// Every command received so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.shared.log.lock().clone()
    }

    pub fn commands_received(&self) -> usize {
        self.shared.log.lock().len()
    }

    /// The highest number of commands ever observed in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.shared.max_in_flight.load(Ordering::SeqCst)
    }
}
