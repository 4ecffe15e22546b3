//! Command channel listener.
//!
//! Newline-delimited JSON over TCP. Each connection gets its own task and
//! handles its commands one after another, so a slow relay only delays the
//! connection that asked for it.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use switchproto::{ErrorKind, Response};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, Decoder, Encoder, Framed};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use crate::dispatch::Dispatcher;

pub struct CommandServer {
    listener: TcpListener,
    max_frame_bytes: usize,
}

impl CommandServer {
    pub async fn bind(addr: &str, max_frame_bytes: usize) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            max_frame_bytes,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` fires. Open connections finish the
    /// command they are on and then close.
    pub async fn run(self, dispatcher: Arc<Dispatcher>, shutdown: CancellationToken) {
        info!(
            "📡 Command channel listening on {:?}",
            self.listener.local_addr().ok()
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Command listener shutting down");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let dispatcher = Arc::clone(&dispatcher);
                        let shutdown = shutdown.clone();
                        let max = self.max_frame_bytes;
                        let span = tracing::info_span!("connection", %peer);
                        tokio::spawn(
                            serve_connection(stream, peer, dispatcher, max, shutdown).instrument(span),
                        );
                    }
                    Err(e) => warn!("Accept failed: {}", e),
                },
            }
        }
    }
}

/// One unit read off the command channel.
#[derive(Debug, PartialEq)]
enum Frame {
    Line(Bytes),
    /// A line longer than the limit; its bytes were discarded up to the
    /// next newline.
    Oversized,
}

/// Newline framing that reports overlong lines as a frame rather than an
/// error, since `Framed` ends the stream after any decoder error.
struct CommandCodec {
    inner: AnyDelimiterCodec,
}

impl CommandCodec {
    fn new(max_frame_bytes: usize) -> Self {
        Self {
            inner: AnyDelimiterCodec::new_with_max_length(
                b"\n".to_vec(),
                b"\n".to_vec(),
                max_frame_bytes,
            ),
        }
    }
}

impl Decoder for CommandCodec {
    type Item = Frame;
    type Error = AnyDelimiterCodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, Self::Error> {
        match self.inner.decode(buf) {
            Ok(line) => Ok(line.map(Frame::Line)),
            Err(AnyDelimiterCodecError::MaxChunkLengthExceeded) => Ok(Some(Frame::Oversized)),
            Err(e) => Err(e),
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, Self::Error> {
        match self.inner.decode_eof(buf) {
            Ok(line) => Ok(line.map(Frame::Line)),
            Err(AnyDelimiterCodecError::MaxChunkLengthExceeded) => Ok(Some(Frame::Oversized)),
            Err(e) => Err(e),
        }
    }
}

impl Encoder<String> for CommandCodec {
    type Error = AnyDelimiterCodecError;

    fn encode(&mut self, line: String, buf: &mut BytesMut) -> Result<(), Self::Error> {
        self.inner.encode(line, buf)
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    max_frame_bytes: usize,
    shutdown: CancellationToken,
) {
    debug!("Client connected");
    if let Err(e) = stream.set_nodelay(true) {
        debug!("set_nodelay failed for {}: {}", peer, e);
    }

    let mut framed = Framed::new(stream, CommandCodec::new(max_frame_bytes));

    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = framed.next() => frame,
        };

        let response = match frame {
            Some(Ok(Frame::Line(bytes))) => {
                if bytes.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                dispatcher.handle_frame(&bytes).await
            }
            Some(Ok(Frame::Oversized)) => {
                warn!("Command frame exceeded {} bytes", max_frame_bytes);
                Response::error(
                    ErrorKind::Decode,
                    format!("Invalid JSON: command exceeds {} bytes", max_frame_bytes),
                )
            }
            Some(Err(e)) => {
                debug!("Connection error: {}", e);
                break;
            }
            None => break,
        };

        if let Err(e) = framed.send(response.to_line()).await {
            debug!("Failed to write response: {}", e);
            break;
        }
    }

    debug!("Client disconnected");
}
