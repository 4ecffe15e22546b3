//! Command dispatch.
//!
//! Turns one decoded command into one response. Relays to reply-bearing
//! addresses register a waiter before the datagram leaves, then block the
//! calling connection until the reply or the deadline; everything else is
//! answered immediately.

use std::sync::Arc;
use std::time::Duration;

use switchproto::{
    AddressCatalog, Command, ErrorKind, OscAddress, OscArg, OscMessage, Response, StatusSnapshot,
};
use tracing::{debug, error, instrument, warn};

use crate::registry::{CorrelationError, Registry};
use crate::transmitter::OscSink;

/// Ports and hosts reported by `status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub remote_host: String,
    pub remote_port: u16,
    pub receive_port: u16,
    pub command_port: u16,
}

pub struct Dispatcher {
    registry: Registry,
    sink: Arc<dyn OscSink>,
    catalog: AddressCatalog,
    timeout: Duration,
    endpoints: Endpoints,
}

impl Dispatcher {
    pub fn new(
        registry: Registry,
        sink: Arc<dyn OscSink>,
        catalog: AddressCatalog,
        timeout: Duration,
        endpoints: Endpoints,
    ) -> Self {
        Self {
            registry,
            sink,
            catalog,
            timeout,
            endpoints,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Decode one command frame and handle it. Never fails: every problem
    /// becomes an error envelope.
    pub async fn handle_frame(&self, frame: &[u8]) -> Response {
        match Command::parse(frame) {
            Ok(command) => self.dispatch(command).await,
            Err(e) => {
                debug!("Rejected command frame: {}", e);
                Response::from(e)
            }
        }
    }

    pub async fn dispatch(&self, command: Command) -> Response {
        match command {
            Command::Relay { address, args } => self.relay(address, args).await,
            Command::Status => self.status(),
            Command::Ping => Response::pong(),
        }
    }

    pub fn status(&self) -> Response {
        Response::status(StatusSnapshot {
            daemon: "running".to_string(),
            ableton_host: self.endpoints.remote_host.clone(),
            ableton_port: self.endpoints.remote_port,
            receive_port: self.endpoints.receive_port,
            socket_port: self.endpoints.command_port,
            timeout_secs: self.timeout.as_secs_f64(),
            waiter_policy: self.registry.policy().to_string(),
            reply_prefixes: self.catalog.reply_prefixes(),
            pending: self.registry.pending_count(),
        })
    }

    async fn relay(&self, address: String, args: Vec<OscArg>) -> Response {
        let address = match self.catalog.classify(&address) {
            Ok(address) => address,
            Err(e) => return Response::error_for(ErrorKind::Protocol, e.to_string(), address),
        };

        if address.awaits_reply() {
            self.request_reply(address, args).await
        } else {
            self.send_one_way(address, args).await
        }
    }

    #[instrument(skip(self, args), fields(address = %address, domain = %address.domain()))]
    async fn request_reply(&self, address: OscAddress, args: Vec<OscArg>) -> Response {
        // Registered first so a fast reply is never missed
        let waiter = self.registry.register(address.as_str());

        let message = OscMessage::new(address.as_str(), args);
        if let Err(e) = self.sink.send(&message).await {
            error!("Send failed: {}", e);
            drop(waiter);
            return transport_error(address, e);
        }

        match self.registry.await_with_timeout(waiter, self.timeout).await {
            Ok(data) => Response::success(address.into_string(), data),
            Err(e @ CorrelationError::Timeout { .. }) => {
                warn!("{}", e);
                Response::error_for(ErrorKind::Timeout, e.to_string(), address.into_string())
            }
            Err(e @ CorrelationError::Superseded { .. }) => {
                Response::error_for(ErrorKind::Superseded, e.to_string(), address.into_string())
            }
        }
    }

    #[instrument(skip(self, args), fields(address = %address))]
    async fn send_one_way(&self, address: OscAddress, args: Vec<OscArg>) -> Response {
        let message = OscMessage::new(address.as_str(), args);
        match self.sink.send(&message).await {
            Ok(()) => Response::sent(address.into_string()),
            Err(e) => {
                error!("Send failed: {}", e);
                transport_error(address, e)
            }
        }
    }
}

fn transport_error(address: OscAddress, err: impl std::fmt::Display) -> Response {
    Response::error_for(
        ErrorKind::Transport,
        format!("Error sending OSC message: {}", err),
        address.into_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transmitter::TransportError;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::net::SocketAddr;
    use std::sync::Mutex;
    use switchconf::WaiterPolicy;
    use switchproto::OkBody;

    /// Records sends; optionally answers reply-bearing ones through the registry.
    struct LoopbackSink {
        registry: Registry,
        sent: Mutex<Vec<OscMessage>>,
        answer: Option<Vec<OscArg>>,
    }

    #[async_trait]
    impl OscSink for LoopbackSink {
        async fn send(&self, message: &OscMessage) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push(message.clone());
            if let Some(answer) = &self.answer {
                self.registry.resolve(&message.address, answer.clone());
            }
            Ok(())
        }

        fn target(&self) -> SocketAddr {
            "127.0.0.1:11000".parse().unwrap()
        }
    }

    struct FailingSink;

    #[async_trait]
    impl OscSink for FailingSink {
        async fn send(&self, _message: &OscMessage) -> Result<(), TransportError> {
            Err(TransportError::Send {
                target: self.target(),
                source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
            })
        }

        fn target(&self) -> SocketAddr {
            "127.0.0.1:11000".parse().unwrap()
        }
    }

    fn endpoints() -> Endpoints {
        Endpoints {
            remote_host: "127.0.0.1".to_string(),
            remote_port: 11000,
            receive_port: 11001,
            command_port: 65432,
        }
    }

    fn dispatcher(sink: Arc<dyn OscSink>, registry: Registry, timeout: Duration) -> Dispatcher {
        Dispatcher::new(registry, sink, AddressCatalog::default(), timeout, endpoints())
    }

    fn loopback(answer: Option<Vec<OscArg>>) -> (Dispatcher, Arc<LoopbackSink>) {
        let registry = Registry::new(WaiterPolicy::Fifo);
        let sink = Arc::new(LoopbackSink {
            registry: registry.clone(),
            sent: Mutex::new(Vec::new()),
            answer,
        });
        let d = dispatcher(sink.clone(), registry, Duration::from_millis(200));
        (d, sink)
    }

    #[tokio::test]
    async fn getter_returns_reply_data() {
        let (d, sink) = loopback(Some(vec![OscArg::Float(120.0)]));
        let response = d
            .dispatch(Command::relay("/live/song/get/tempo", vec![]))
            .await;
        assert_eq!(
            response,
            Response::success("/live/song/get/tempo", vec![OscArg::Float(120.0)])
        );
        assert_eq!(sink.sent.lock().unwrap().len(), 1);
        assert_eq!(d.registry().pending_count(), 0);
    }

    #[tokio::test]
    async fn setter_is_sent_without_waiting() {
        let (d, sink) = loopback(None);
        let response = d
            .dispatch(Command::relay(
                "/live/song/set/tempo",
                vec![OscArg::Float(128.0)],
            ))
            .await;
        assert_eq!(response, Response::sent("/live/song/set/tempo"));
        assert_eq!(
            sink.sent.lock().unwrap()[0],
            OscMessage::new("/live/song/set/tempo", vec![OscArg::Float(128.0)])
        );
        assert_eq!(d.registry().pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_getter_times_out() {
        let (d, _sink) = loopback(None);
        let response = d
            .dispatch(Command::relay("/live/track/get/name", vec![OscArg::Int(0)]))
            .await;
        assert_eq!(
            response,
            Response::error_for(
                ErrorKind::Timeout,
                "Timeout waiting for response to /live/track/get/name",
                "/live/track/get/name",
            )
        );
        assert_eq!(d.registry().pending_count(), 0);
    }

    #[tokio::test]
    async fn send_failure_cleans_up() {
        let registry = Registry::new(WaiterPolicy::Fifo);
        let d = dispatcher(Arc::new(FailingSink), registry, Duration::from_secs(5));

        let response = d
            .dispatch(Command::relay("/live/song/get/tempo", vec![]))
            .await;
        assert_eq!(response.error_kind(), Some(ErrorKind::Transport));
        match response {
            Response::Error { message, .. } => {
                assert!(message.starts_with("Error sending OSC message:"), "{message}")
            }
            other => panic!("unexpected response: {other:?}"),
        }
        assert_eq!(d.registry().pending_count(), 0);

        let response = d
            .dispatch(Command::relay("/live/song/stop_playing", vec![]))
            .await;
        assert_eq!(response.error_kind(), Some(ErrorKind::Transport));
    }

    #[tokio::test]
    async fn invalid_address_is_protocol_error() {
        let (d, sink) = loopback(None);
        let response = d.dispatch(Command::relay("live/song", vec![])).await;
        assert_eq!(response.error_kind(), Some(ErrorKind::Protocol));
        assert!(sink.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn ping_and_status() {
        let (d, _sink) = loopback(None);
        assert_eq!(d.dispatch(Command::Ping).await, Response::pong());
        assert_eq!(d.dispatch(Command::Ping).await, Response::pong());

        let first = d.dispatch(Command::Status).await;
        let second = d.dispatch(Command::Status).await;
        assert_eq!(first, second);
        match first {
            Response::Ok(OkBody::Status(snapshot)) => {
                assert_eq!(snapshot.daemon, "running");
                assert_eq!(snapshot.ableton_port, 11000);
                assert_eq!(snapshot.receive_port, 11001);
                assert_eq!(snapshot.socket_port, 65432);
                assert_eq!(snapshot.waiter_policy, "fifo");
                assert!(snapshot
                    .reply_prefixes
                    .contains(&"/live/track/get".to_string()));
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn frames_are_decoded() {
        let (d, _sink) = loopback(None);
        let response = d.handle_frame(b"{\"command\":\"ping\"}").await;
        assert_eq!(response, Response::pong());

        let response = d.handle_frame(b"{oops").await;
        assert_eq!(response.error_kind(), Some(ErrorKind::Decode));

        let response = d.handle_frame(br#"{"command":"dance"}"#).await;
        assert_eq!(
            response,
            Response::error(ErrorKind::Protocol, "Unknown command: dance")
        );

        let response = d.handle_frame(br#"{"command":"relay"}"#).await;
        assert_eq!(
            response,
            Response::error(ErrorKind::Protocol, "Missing OSC address")
        );
    }
}
