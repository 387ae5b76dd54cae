// src/config.rs

//! Manages bridge configuration: loading from TOML, defaults, and validation.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Which transport to use for the instrument.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentKind {
    /// A raw SCPI socket (LXI instruments, USBTMC gateways).
    #[default]
    Tcp,
    /// The built-in electronic load simulator.
    Simulated,
}

/// Settings for the instrument channel and the lock guarding it.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct InstrumentConfig {
    #[serde(default)]
    pub kind: InstrumentKind,
    /// Socket address of the instrument; also reported by `STATUS`.
    #[serde(default = "default_instrument_address")]
    pub address: String,
    /// Upper bound for a single instrument round-trip.
    #[serde(default = "default_command_timeout", with = "humantime_serde")]
    pub command_timeout: Duration,
    /// Upper bound for waiting on another session's in-flight command.
    #[serde(default = "default_lock_timeout", with = "humantime_serde")]
    pub lock_timeout: Duration,
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Period of the background liveness probe. Zero disables it.
    #[serde(default = "default_probe_interval", with = "humantime_serde")]
    pub probe_interval: Duration,
    #[serde(default = "default_probe_command")]
    pub probe_command: String,
}

fn default_instrument_address() -> String {
    "127.0.0.1:5555".to_string()
}
fn default_command_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_lock_timeout() -> Duration {
    Duration::from_secs(8)
}
fn default_connect_timeout() -> Duration {
    Duration::from_secs(3)
}
fn default_probe_interval() -> Duration {
    Duration::from_secs(30)
}
fn default_probe_command() -> String {
    "*IDN?".to_string()
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            kind: InstrumentKind::default(),
            address: default_instrument_address(),
            command_timeout: default_command_timeout(),
            lock_timeout: default_lock_timeout(),
            connect_timeout: default_connect_timeout(),
            probe_interval: default_probe_interval(),
            probe_command: default_probe_command(),
        }
    }
}

/// Per-client session limits.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SessionConfig {
    /// Longest accepted request line in bytes, terminator excluded.
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
    /// Closes sessions that send nothing for this long. Zero (the default)
    /// never times out, since clients are often driven by hand.
    #[serde(default, with = "humantime_serde")]
    pub idle_timeout: Duration,
}

fn default_max_line_length() -> usize {
    4096
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_line_length: default_max_line_length(),
            idle_timeout: Duration::ZERO,
        }
    }
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MetricsConfig {
    /// If true, an HTTP server will be started to expose Prometheus metrics.
    #[serde(default)]
    pub enabled: bool,
    /// The port for the Prometheus metrics server.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    9025
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

/// The resolved bridge configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
    #[serde(default)]
    pub instrument: InstrumentConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    5025
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_clients() -> usize {
    64
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            max_clients: default_max_clients(),
            instrument: InstrumentConfig::default(),
            session: SessionConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{}'", path.display()))?;
        Self::from_toml(&contents)
            .with_context(|| format!("Invalid configuration in '{}'", path.display()))
    }

    /// Parses and validates a TOML document.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration to ensure logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("port cannot be 0"));
        }
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }
        if self.max_clients == 0 {
            return Err(anyhow!("max_clients cannot be 0"));
        }
        if self.max_clients > Semaphore::MAX_PERMITS {
            return Err(anyhow!(
                "max_clients cannot exceed {}",
                Semaphore::MAX_PERMITS
            ));
        }
        if self.instrument.address.trim().is_empty() {
            return Err(anyhow!("instrument.address cannot be empty"));
        }
        if self.instrument.command_timeout.is_zero() {
            return Err(anyhow!("instrument.command_timeout must be greater than 0"));
        }
        if self.instrument.lock_timeout.is_zero() {
            return Err(anyhow!("instrument.lock_timeout must be greater than 0"));
        }
        if self.instrument.probe_command.trim().is_empty() {
            return Err(anyhow!("instrument.probe_command cannot be empty"));
        }
        if self.session.max_line_length < 16 {
            return Err(anyhow!("session.max_line_length must be at least 16 bytes"));
        }
        if self.metrics.enabled && self.metrics.port == self.port {
            return Err(anyhow!("metrics.port must differ from the bridge port"));
        }
        Ok(())
    }

    /// The bridge's listening address as `host:port`.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
