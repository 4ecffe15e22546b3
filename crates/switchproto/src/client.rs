//! Command channel client.
//!
//! Talks to a running daemon over TCP, one JSON line per request. Used by the
//! CLI and by integration tests; agents in other languages speak the same
//! protocol directly.
//!
//! Requests on one connection are strictly sequential. Open several clients
//! for concurrent requests. A request that times out leaves its reply in
//! flight, so the connection is abandoned and later requests fail with
//! [`ClientError::Closed`].

use crate::envelope::{Command, OkBody, Response, StatusSnapshot};
use crate::osc::OscArg;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::debug;

/// Largest response line the client will accept.
pub const MAX_RESPONSE_BYTES: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Failed to connect to daemon: {0}")]
    Connect(#[source] std::io::Error),
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("Connection closed by daemon")]
    Closed,
    #[error("Channel error: {0}")]
    Channel(#[from] LinesCodecError),
    #[error("Malformed response: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Unexpected response: {0:?}")]
    Unexpected(Response),
}

/// A connected command channel.
pub struct BridgeClient {
    /// `None` once a timeout or channel failure broke request/response pairing.
    framed: Option<Framed<TcpStream, LinesCodec>>,
    peer: SocketAddr,
    timeout: Duration,
}

impl BridgeClient {
    /// Connect to the daemon. `timeout` bounds the connect and every
    /// later request round trip.
    pub async fn connect(addr: impl ToSocketAddrs, timeout: Duration) -> Result<Self, ClientError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ClientError::Timeout(timeout))?
            .map_err(ClientError::Connect)?;
        stream.set_nodelay(true).map_err(ClientError::Connect)?;
        let peer = stream.peer_addr().map_err(ClientError::Connect)?;

        debug!("Connected to daemon at {}", peer);

        Ok(Self {
            framed: Some(Framed::new(
                stream,
                LinesCodec::new_with_max_length(MAX_RESPONSE_BYTES),
            )),
            peer,
            timeout,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Send one command and wait for its response.
    pub async fn request(&mut self, command: &Command) -> Result<Response, ClientError> {
        let line = command.to_line()?;
        self.request_line(&line).await
    }

    /// Send a raw line as-is. Lets callers exercise malformed input.
    pub async fn request_line(&mut self, line: &str) -> Result<Response, ClientError> {
        let timeout = self.timeout;
        let framed = self.framed.as_mut().ok_or(ClientError::Closed)?;
        let result = match tokio::time::timeout(timeout, round_trip(framed, line)).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout(timeout)),
        };

        if matches!(
            result,
            Err(ClientError::Timeout(_) | ClientError::Channel(_) | ClientError::Closed)
        ) {
            debug!("Abandoning connection to {}", self.peer);
            self.framed = None;
        }
        result
    }

    pub async fn ping(&mut self) -> Result<(), ClientError> {
        match self.request(&Command::Ping).await? {
            Response::Ok(OkBody::Message { message }) if message == "pong" => Ok(()),
            other => Err(ClientError::Unexpected(other)),
        }
    }

    pub async fn status(&mut self) -> Result<StatusSnapshot, ClientError> {
        match self.request(&Command::Status).await? {
            Response::Ok(OkBody::Status(snapshot)) => Ok(snapshot),
            other => Err(ClientError::Unexpected(other)),
        }
    }

    /// Relay an OSC message. Error envelopes come back as `Ok(Response::Error)`
    /// so callers can inspect the kind.
    pub async fn relay(
        &mut self,
        address: impl Into<String>,
        args: Vec<OscArg>,
    ) -> Result<Response, ClientError> {
        self.request(&Command::relay(address, args)).await
    }
}

async fn round_trip(
    framed: &mut Framed<TcpStream, LinesCodec>,
    line: &str,
) -> Result<Response, ClientError> {
    framed.send(line).await?;
    match framed.next().await {
        Some(Ok(reply)) => Ok(Response::from_line(&reply)?),
        Some(Err(e)) => Err(e.into()),
        None => Err(ClientError::Closed),
    }
}
