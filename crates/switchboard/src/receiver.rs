//! Inbound OSC reply listener.
//!
//! Owns the receive socket. Every decoded message is offered to the
//! [`Registry`]; replies nobody is waiting for are logged and dropped, as are
//! datagrams that fail to decode. The loop only exits on cancellation.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use switchproto::OscPacket;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registry::{Registry, Resolution};

/// Largest datagram UDP can carry.
const MAX_DATAGRAM: usize = 65_536;

/// Back-off after a socket error so a persistent failure doesn't spin.
const ERROR_BACKOFF: Duration = Duration::from_millis(50);

pub struct OscReceiver {
    socket: UdpSocket,
    registry: Registry,
}

impl OscReceiver {
    pub async fn bind(addr: &str, registry: Registry) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self { socket, registry })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Receive until `shutdown` fires. Dropping `self` at the end releases
    /// the port.
    pub async fn run(self, shutdown: CancellationToken) {
        let local = self.local_addr().ok();
        info!("👂 Listening for OSC replies on {:?}", local);

        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Receive loop shutting down");
                    break;
                }
                result = self.socket.recv_from(&mut buf) => match result {
                    Ok((len, peer)) => {
                        handle_datagram(&self.registry, &buf[..len], peer);
                    }
                    Err(e) => {
                        warn!("OSC receive error: {}", e);
                        tokio::time::sleep(ERROR_BACKOFF).await;
                    }
                },
            }
        }
    }
}

/// Decode one datagram and offer each message to the registry. Returns how
/// many messages were delivered to a waiter.
pub fn handle_datagram(registry: &Registry, data: &[u8], peer: SocketAddr) -> usize {
    let packet = match OscPacket::decode(data) {
        Ok(packet) => packet,
        Err(e) => {
            warn!(%peer, bytes = data.len(), "Dropping malformed OSC datagram: {}", e);
            return 0;
        }
    };

    let mut delivered = 0;
    for message in packet.into_messages() {
        debug!(%peer, "Received {}", message);
        match registry.resolve(&message.address, message.args) {
            Resolution::Delivered { ticket } => {
                debug!(address = %message.address, ticket, "Reply delivered");
                delivered += 1;
            }
            Resolution::Unsolicited => {
                debug!(address = %message.address, "No pending request; reply dropped");
            }
        }
    }
    delivered
}
