//! JSON envelopes for the command channel.
//!
//! One command per newline-terminated line, one response line back.
//!
//! ```text
//! → {"command":"relay","address":"/live/song/get/tempo","args":[]}
//! ← {"status":"success","address":"/live/song/get/tempo","data":[120.0]}
//!
//! → {"command":"relay","address":"/live/song/set/tempo","args":[128]}
//! ← {"status":"sent","address":"/live/song/set/tempo"}
//!
//! → {"command":"ping"}
//! ← {"status":"ok","message":"pong"}
//! ```
//!
//! `send_message` and `get_status` are accepted as aliases of `relay` and
//! `status` for older agents.

use crate::osc::OscArg;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Failures turning a command line into a [`Command`].
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("Invalid JSON: expected an object")]
    NotAnObject,
    #[error("Missing command")]
    MissingCommand,
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
    #[error("Missing OSC address")]
    MissingAddress,
    #[error("Invalid args: {0}")]
    InvalidArgs(String),
}

impl ProtocolError {
    /// Decode failures are malformed input; the rest are well-formed JSON
    /// asking for something the daemon does not understand.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::InvalidJson(_) | ProtocolError::NotAnObject => ErrorKind::Decode,
            _ => ErrorKind::Protocol,
        }
    }
}

/// A request from the agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum Command {
    /// Forward an OSC message, awaiting the reply if the address has one.
    Relay { address: String, args: Vec<OscArg> },
    /// Report daemon configuration and state.
    Status,
    /// Liveness probe.
    Ping,
}

impl Command {
    pub fn relay(address: impl Into<String>, args: Vec<OscArg>) -> Self {
        Command::Relay {
            address: address.into(),
            args,
        }
    }

    /// Parse one command frame.
    pub fn parse(frame: &[u8]) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_slice(frame)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let Value::Object(mut map) = value else {
            return Err(ProtocolError::NotAnObject);
        };

        let kind = match map.remove("command") {
            Some(Value::String(kind)) => kind,
            Some(other) => return Err(ProtocolError::UnknownCommand(other.to_string())),
            None => return Err(ProtocolError::MissingCommand),
        };

        match kind.as_str() {
            "relay" | "send_message" => {
                let address = match map.remove("address") {
                    Some(Value::String(address)) if !address.is_empty() => address,
                    _ => return Err(ProtocolError::MissingAddress),
                };
                let args = match map.remove("args") {
                    None | Some(Value::Null) => Vec::new(),
                    Some(args) => serde_json::from_value(args)
                        .map_err(|e| ProtocolError::InvalidArgs(e.to_string()))?,
                };
                Ok(Command::Relay { address, args })
            }
            "status" | "get_status" => Ok(Command::Status),
            "ping" => Ok(Command::Ping),
            _ => Err(ProtocolError::UnknownCommand(kind)),
        }
    }

    /// Encode as a single line (without the trailing newline).
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Category of an error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// The OSC datagram could not be sent.
    Transport,
    /// No reply arrived within the deadline.
    Timeout,
    /// The command frame was not valid JSON, or too long.
    Decode,
    /// Valid JSON that is not a usable command.
    Protocol,
    /// A newer request for the same address took this one's place.
    Superseded,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Decode => "decode",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Superseded => "superseded",
        };
        f.write_str(s)
    }
}

/// Daemon configuration and state as reported by `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Always "running" when the daemon answers.
    pub daemon: String,
    pub ableton_host: String,
    pub ableton_port: u16,
    pub receive_port: u16,
    pub socket_port: u16,
    pub timeout_secs: f64,
    pub waiter_policy: String,
    /// Address prefixes that are answered with a correlated reply.
    #[serde(default)]
    pub reply_prefixes: Vec<String>,
    /// Requests currently awaiting a reply.
    pub pending: usize,
}

/// Body of an `ok` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OkBody {
    Status(StatusSnapshot),
    Message { message: String },
}

/// A reply to the agent, tagged by `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Response {
    /// The remote application replied.
    Success { address: String, data: Vec<OscArg> },
    /// A one-way message was handed to the transport.
    Sent { address: String },
    Error {
        kind: ErrorKind,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        address: Option<String>,
    },
    Ok(OkBody),
}

impl Response {
    pub fn success(address: impl Into<String>, data: Vec<OscArg>) -> Self {
        Response::Success {
            address: address.into(),
            data,
        }
    }

    pub fn sent(address: impl Into<String>) -> Self {
        Response::Sent {
            address: address.into(),
        }
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Response::Error {
            kind,
            message: message.into(),
            address: None,
        }
    }

    pub fn error_for(kind: ErrorKind, message: impl Into<String>, address: impl Into<String>) -> Self {
        Response::Error {
            kind,
            message: message.into(),
            address: Some(address.into()),
        }
    }

    pub fn pong() -> Self {
        Response::Ok(OkBody::Message {
            message: "pong".to_string(),
        })
    }

    pub fn status(snapshot: StatusSnapshot) -> Self {
        Response::Ok(OkBody::Status(snapshot))
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Response::Error { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Encode as a single line (without the trailing newline).
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            // Only reachable if a value refuses to serialize; keep the channel in protocol
            format!(
                r#"{{"status":"error","kind":"protocol","message":"Failed to encode response: {}"}}"#,
                e.to_string().replace('"', "'")
            )
        })
    }

    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

impl From<ProtocolError> for Response {
    fn from(err: ProtocolError) -> Self {
        Response::error(err.kind(), err.to_string())
    }
}
