//! Configuration sections. Every field has a compiled default so a partial
//! file only needs to name what it changes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Command channel listener (agent ↔ daemon).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    /// Bind host for the command channel.
    /// Default: 127.0.0.1
    pub host: String,

    /// Bind port for the command channel.
    /// Default: 65432
    pub port: u16,

    /// Longest accepted command line in bytes (excluding the newline).
    /// Default: 65536
    pub max_frame_bytes: usize,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 65432,
            max_frame_bytes: 64 * 1024,
        }
    }
}

/// Where outbound OSC datagrams go (the remote application).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Default: 127.0.0.1
    pub host: String,

    /// Port the remote application listens on.
    /// Default: 11000
    pub port: u16,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 11000,
        }
    }
}

/// Local socket that receives reply datagrams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiveConfig {
    /// Default: 127.0.0.1
    pub host: String,

    /// Default: 11001
    pub port: u16,
}

impl Default for ReceiveConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 11001,
        }
    }
}

/// What happens when a second request for an address arrives while the first
/// is still waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaiterPolicy {
    /// Queue waiters per address; each reply resolves the oldest one.
    #[default]
    Fifo,
    /// Keep a single waiter per address; the newcomer evicts the old one.
    Replace,
}

impl WaiterPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaiterPolicy::Fifo => "fifo",
            WaiterPolicy::Replace => "replace",
        }
    }
}

impl fmt::Display for WaiterPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WaiterPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fifo" => Ok(WaiterPolicy::Fifo),
            "replace" => Ok(WaiterPolicy::Replace),
            other => Err(format!("unknown waiter policy '{}' (expected fifo or replace)", other)),
        }
    }
}

/// Request/reply correlation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Seconds to wait for a reply datagram.
    /// Default: 5.0
    pub timeout_secs: f64,

    /// Default: fifo
    pub waiter_policy: WaiterPolicy,

    /// Namespace root of the remote address space.
    /// Default: /live
    pub address_root: String,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 5.0,
            waiter_policy: WaiterPolicy::Fifo,
            address_root: "/live".to_string(),
        }
    }
}

/// Logging and OpenTelemetry export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// EnvFilter directive (trace, debug, info, warn, error, or a full filter).
    /// Default: info
    pub log_level: String,

    /// OTLP gRPC endpoint. Empty disables export.
    /// Default: ""
    pub otlp_endpoint: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            otlp_endpoint: String::new(),
        }
    }
}

impl TelemetryConfig {
    pub fn otlp_enabled(&self) -> bool {
        !self.otlp_endpoint.trim().is_empty()
    }
}
