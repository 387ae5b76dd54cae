// src/core/protocol/envelope.rs

//! The JSON response envelope written back to clients, one per processed request.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// The value returned for the `STATUS` directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStatus {
    pub server_running: bool,
    pub instrument_connected: bool,
    pub instrument_address: String,
    /// A best-effort snapshot of the connection registry size.
    pub active_connections: usize,
}

/// The `response` field of an envelope: either the instrument's reply text or
/// a nested status object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Status(ServerStatus),
    Text(String),
}

impl From<String> for ResponseBody {
    fn from(s: String) -> Self {
        ResponseBody::Text(s)
    }
}

impl From<&str> for ResponseBody {
    fn from(s: &str) -> Self {
        ResponseBody::Text(s.to_string())
    }
}

impl From<ServerStatus> for ResponseBody {
    fn from(status: ServerStatus) -> Self {
        ResponseBody::Status(status)
    }
}

/// A structured reply. Exactly one of `response` and `error` is set on every
/// envelope produced for a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub success: bool,
    pub command: Option<String>,
    pub response: Option<ResponseBody>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ResponseEnvelope {
    /// Builds a successful envelope for `command`.
    pub fn success(command: impl Into<String>, response: impl Into<ResponseBody>) -> Self {
        Self {
            success: true,
            command: Some(command.into()),
            response: Some(response.into()),
            error: None,
            timestamp: timestamp_now(),
        }
    }

    /// Builds a failed envelope. `command` is `None` only when the failure is
    /// not tied to a parsed request, e.g. an oversized line or a rejected
    /// connection.
    pub fn failure(command: Option<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            command,
            response: None,
            error: Some(error.into()),
            timestamp: timestamp_now(),
        }
    }

    /// Returns the nested status object, if this envelope carries one.
    pub fn status(&self) -> Option<&ServerStatus> {
        match &self.response {
            Some(ResponseBody::Status(status)) => Some(status),
            _ => None,
        }
    }

    /// Returns the reply text, if this envelope carries one.
    pub fn text(&self) -> Option<&str> {
        match &self.response {
            Some(ResponseBody::Text(text)) => Some(text),
            _ => None,
        }
    }
}

/// Current UTC time as RFC 3339 with microsecond precision.
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}
