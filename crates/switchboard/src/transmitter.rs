//! Outbound OSC over UDP.

use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use switchproto::{OscError, OscMessage};
use tokio::net::{lookup_host, UdpSocket};
use tracing::trace;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("{0}")]
    Encode(#[from] OscError),
    #[error("{source}")]
    Send {
        target: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("Short write to {target}: {sent} of {len} bytes")]
    ShortWrite {
        target: SocketAddr,
        sent: usize,
        len: usize,
    },
    #[error("Could not resolve {addr}: {reason}")]
    Resolve { addr: String, reason: String },
}

/// Somewhere OSC messages can be sent.
///
/// The daemon uses [`UdpTransmitter`]; tests substitute sinks that fail.
#[async_trait]
pub trait OscSink: Send + Sync {
    async fn send(&self, message: &OscMessage) -> Result<(), TransportError>;

    /// Where messages end up, for status and logs.
    fn target(&self) -> SocketAddr;
}

/// Fire-and-forget UDP sender bound to an ephemeral local port.
#[derive(Debug)]
pub struct UdpTransmitter {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpTransmitter {
    /// Resolve `remote` (`host:port`) and bind a sending socket of the
    /// matching address family.
    pub async fn connect(remote: &str) -> Result<Self, TransportError> {
        let target = lookup_host(remote)
            .await
            .map_err(|e| TransportError::Resolve {
                addr: remote.to_string(),
                reason: e.to_string(),
            })?
            .next()
            .ok_or_else(|| TransportError::Resolve {
                addr: remote.to_string(),
                reason: "no addresses returned".to_string(),
            })?;
        Self::bind_for(target).await
    }

    pub async fn bind_for(target: SocketAddr) -> Result<Self, TransportError> {
        let local: SocketAddr = if target.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|source| TransportError::Send { target, source })?;
        Ok(Self { socket, target })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

#[async_trait]
impl OscSink for UdpTransmitter {
    async fn send(&self, message: &OscMessage) -> Result<(), TransportError> {
        let datagram = message.encode()?;
        let sent = self
            .socket
            .send_to(&datagram, self.target)
            .await
            .map_err(|source| TransportError::Send {
                target: self.target,
                source,
            })?;

        if sent != datagram.len() {
            return Err(TransportError::ShortWrite {
                target: self.target,
                sent,
                len: datagram.len(),
            });
        }

        trace!(target_addr = %self.target, bytes = sent, "Sent {}", message);
        Ok(())
    }

    fn target(&self) -> SocketAddr {
        self.target
    }
}
