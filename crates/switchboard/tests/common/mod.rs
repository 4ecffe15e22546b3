//! Shared fixtures: a daemon on ephemeral ports and a fake remote application.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use switchboard::{Daemon, DaemonHandle};
use switchconf::{BridgeConfig, WaiterPolicy};
use switchproto::{BridgeClient, OscArg, OscMessage, OscPacket};
use tokio::net::UdpSocket;

/// Stands in for the remote application: receives our datagrams and answers
/// from its own socket.
pub struct FakeRemote {
    socket: UdpSocket,
}

impl FakeRemote {
    pub async fn bind() -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        Self { socket }
    }

    pub fn addr(&self) -> SocketAddr {
        self.socket.local_addr().unwrap()
    }

    /// Next message the daemon sent, or panic after two seconds.
    pub async fn recv(&self) -> OscMessage {
        let mut buf = vec![0u8; 65_536];
        let (n, _) = tokio::time::timeout(Duration::from_secs(2), self.socket.recv_from(&mut buf))
            .await
            .expect("remote received nothing")
            .unwrap();
        let mut messages = OscPacket::decode(&buf[..n]).unwrap().into_messages();
        assert_eq!(messages.len(), 1, "daemon sends one message per datagram");
        messages.remove(0)
    }

    /// True if nothing arrives within `wait`.
    pub async fn is_quiet(&self, wait: Duration) -> bool {
        let mut buf = vec![0u8; 65_536];
        tokio::time::timeout(wait, self.socket.recv_from(&mut buf))
            .await
            .is_err()
    }

    pub async fn reply(&self, to: SocketAddr, address: &str, args: Vec<OscArg>) {
        let datagram = OscMessage::new(address, args).encode().unwrap();
        self.socket.send_to(&datagram, to).await.unwrap();
    }

    pub async fn send_raw(&self, to: SocketAddr, datagram: &[u8]) {
        self.socket.send_to(datagram, to).await.unwrap();
    }
}

pub fn config_for(remote: SocketAddr, timeout: Duration, policy: WaiterPolicy) -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.command.host = "127.0.0.1".to_string();
    config.command.port = 0;
    config.receive.host = "127.0.0.1".to_string();
    config.receive.port = 0;
    config.remote.host = remote.ip().to_string();
    config.remote.port = remote.port();
    config.correlation.timeout_secs = timeout.as_secs_f64();
    config.correlation.waiter_policy = policy;
    config
}

/// A daemon wired to a fresh fake remote.
pub async fn start(timeout: Duration) -> (DaemonHandle, FakeRemote) {
    start_with(timeout, WaiterPolicy::Fifo).await
}

pub async fn start_with(timeout: Duration, policy: WaiterPolicy) -> (DaemonHandle, FakeRemote) {
    let remote = FakeRemote::bind().await;
    let config = config_for(remote.addr(), timeout, policy);
    let daemon = Daemon::bind(&config).await.unwrap();
    (daemon.spawn(), remote)
}

pub async fn client(handle: &DaemonHandle) -> BridgeClient {
    BridgeClient::connect(handle.command_addr, Duration::from_secs(10))
        .await
        .unwrap()
}
