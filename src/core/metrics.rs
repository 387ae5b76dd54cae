// src/core/metrics.rs

//! Defines and registers Prometheus metrics for bridge monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, Histogram, TextEncoder, register_counter, register_counter_vec,
    register_gauge, register_histogram,
};

lazy_static! {
    // --- Gauges ---
    /// The number of clients currently connected to the bridge.
    pub static ref CONNECTED_CLIENTS: Gauge =
        register_gauge!("scpi_bridge_connected_clients", "Number of currently connected clients.").unwrap();
    /// Last-known instrument connectivity (1 for connected, 0 for disconnected).
    pub static ref INSTRUMENT_CONNECTED: Gauge =
        register_gauge!("scpi_bridge_instrument_connected", "Last-known instrument connectivity (1 for true, 0 for false).").unwrap();

    // --- Counters ---
    /// The total number of requests processed since startup, directives included.
    pub static ref COMMANDS_PROCESSED_TOTAL: Counter =
        register_counter!("scpi_bridge_commands_processed_total", "Total number of commands processed.").unwrap();
    /// The total number of connections accepted since startup.
    pub static ref CONNECTIONS_RECEIVED_TOTAL: Counter =
        register_counter!("scpi_bridge_connections_received_total", "Total number of connections received.").unwrap();
    /// Connections turned away because `max_clients` was reached.
    pub static ref CONNECTIONS_REJECTED_TOTAL: Counter =
        register_counter!("scpi_bridge_connections_rejected_total", "Total number of connections rejected at the client limit.").unwrap();
    /// Instrument failures, labeled by kind (`timeout`, `lock_timeout`, `io`).
    pub static ref INSTRUMENT_ERRORS_TOTAL: CounterVec =
        register_counter_vec!("scpi_bridge_instrument_errors_total", "Total number of failed instrument exchanges, labeled by kind.", &["kind"]).unwrap();

    // --- Histograms ---
    /// Time spent waiting to acquire the instrument lock.
    pub static ref LOCK_WAIT_SECONDS: Histogram =
        register_histogram!("scpi_bridge_lock_wait_seconds", "Time spent waiting for the instrument lock in seconds.").unwrap();
    /// Duration of a single instrument round-trip.
    pub static ref INSTRUMENT_ROUNDTRIP_SECONDS: Histogram =
        register_histogram!("scpi_bridge_instrument_roundtrip_seconds", "Latency of instrument round-trips in seconds.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
