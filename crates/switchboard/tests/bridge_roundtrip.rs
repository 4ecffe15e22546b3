//! End-to-end tests over real sockets.
//!
//! Each test runs a daemon on ephemeral ports against a fake remote
//! application and drives it through the JSON command channel.

mod common;

use std::time::{Duration, Instant};

use bytes::{BufMut, BytesMut};
use common::{client, start, FakeRemote};
use pretty_assertions::assert_eq;
use switchboard::Daemon;
use switchconf::WaiterPolicy;
use switchproto::{ErrorKind, OkBody, OscArg, OscMessage, Response};
use tokio::net::{TcpStream, UdpSocket};

const TEMPO: &str = "/live/song/get/tempo";

#[tokio::test]
async fn query_returns_remote_reply() {
    let (daemon, remote) = start(Duration::from_secs(5)).await;
    let mut agent = client(&daemon).await;

    let receive_addr = daemon.receive_addr;
    let answer = async {
        let msg = remote.recv().await;
        assert_eq!(msg, OscMessage::new(TEMPO, vec![]));
        remote
            .reply(receive_addr, TEMPO, vec![OscArg::Float(120.0)])
            .await;
    };

    let (response, ()) = tokio::join!(agent.relay(TEMPO, vec![]), answer);
    assert_eq!(
        response.unwrap(),
        Response::success(TEMPO, vec![OscArg::Float(120.0)])
    );

    daemon.shutdown().await.unwrap();
}

#[tokio::test]
async fn unanswered_query_times_out() {
    let (daemon, remote) = start(Duration::from_secs(1)).await;
    let mut agent = client(&daemon).await;

    let start = Instant::now();
    let response = agent
        .relay("/live/track/get/name", vec![OscArg::Int(0)])
        .await
        .unwrap();
    let elapsed = start.elapsed();

    assert_eq!(
        response,
        Response::error_for(
            ErrorKind::Timeout,
            "Timeout waiting for response to /live/track/get/name",
            "/live/track/get/name",
        )
    );
    assert!(elapsed >= Duration::from_secs(1), "returned early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(1500), "returned late: {elapsed:?}");

    // The datagram still went out, with the argument
    assert_eq!(
        remote.recv().await,
        OscMessage::new("/live/track/get/name", vec![OscArg::Int(0)])
    );

    // Nothing left behind
    assert_eq!(agent.status().await.unwrap().pending, 0);

    daemon.shutdown().await.unwrap();
}

#[tokio::test]
async fn setter_is_fire_and_forget() {
    let (daemon, remote) = start(Duration::from_secs(5)).await;
    let mut agent = client(&daemon).await;

    let start = Instant::now();
    let response = agent
        .relay("/live/song/set/tempo", vec![OscArg::Int(128)])
        .await
        .unwrap();

    assert_eq!(response, Response::sent("/live/song/set/tempo"));
    assert!(start.elapsed() < Duration::from_millis(500));
    assert_eq!(
        remote.recv().await,
        OscMessage::new("/live/song/set/tempo", vec![OscArg::Int(128)])
    );

    daemon.shutdown().await.unwrap();
}

#[tokio::test]
async fn json_arguments_arrive_typed() {
    let (daemon, remote) = start(Duration::from_secs(5)).await;
    let mut agent = client(&daemon).await;

    let response = agent
        .request_line(
            r#"{"command":"send_message","address":"/live/clip/set/name","args":[1, 2, "Verse", 0.5, true]}"#,
        )
        .await
        .unwrap();
    assert_eq!(response, Response::sent("/live/clip/set/name"));

    assert_eq!(
        remote.recv().await,
        OscMessage::new(
            "/live/clip/set/name",
            vec![
                OscArg::Int(1),
                OscArg::Int(2),
                OscArg::String("Verse".into()),
                OscArg::Float(0.5),
                OscArg::Int(1),
            ]
        )
    );

    daemon.shutdown().await.unwrap();
}

#[tokio::test]
async fn ping_and_status_are_stable() {
    let (daemon, remote) = start(Duration::from_secs(5)).await;
    let mut agent = client(&daemon).await;

    agent.ping().await.unwrap();
    agent.ping().await.unwrap();

    let first = agent.status().await.unwrap();
    let second = agent.status().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.daemon, "running");
    assert_eq!(first.ableton_port, remote.addr().port());
    assert_eq!(first.receive_port, daemon.receive_addr.port());
    assert_eq!(first.socket_port, daemon.command_addr.port());
    assert_eq!(first.timeout_secs, 5.0);
    assert_eq!(first.pending, 0);

    // Legacy alias
    let response = agent.request_line(r#"{"command":"get_status"}"#).await.unwrap();
    assert_eq!(response, Response::Ok(OkBody::Status(first)));

    // Neither touches the remote
    assert!(remote.is_quiet(Duration::from_millis(100)).await);

    daemon.shutdown().await.unwrap();
}

#[tokio::test]
async fn bad_input_keeps_connection_open() {
    let (daemon, _remote) = start(Duration::from_secs(5)).await;
    let mut agent = client(&daemon).await;

    let response = agent.request_line("{this is not json").await.unwrap();
    assert_eq!(response.error_kind(), Some(ErrorKind::Decode));
    match &response {
        Response::Error { message, .. } => assert!(message.starts_with("Invalid JSON:")),
        other => panic!("unexpected response: {other:?}"),
    }

    let response = agent.request_line(r#"{"command":"teleport"}"#).await.unwrap();
    assert_eq!(
        response,
        Response::error(ErrorKind::Protocol, "Unknown command: teleport")
    );

    let response = agent.request_line(r#"{"command":"relay","args":[1]}"#).await.unwrap();
    assert_eq!(
        response,
        Response::error(ErrorKind::Protocol, "Missing OSC address")
    );

    // Same connection still works
    agent.ping().await.unwrap();

    daemon.shutdown().await.unwrap();
}

#[tokio::test]
async fn unsolicited_and_malformed_datagrams_are_ignored() {
    let (daemon, remote) = start(Duration::from_secs(5)).await;
    let mut agent = client(&daemon).await;
    let receive_addr = daemon.receive_addr;

    // Nobody is waiting for these
    remote
        .reply(receive_addr, TEMPO, vec![OscArg::Float(1.0)])
        .await;
    remote.send_raw(receive_addr, b"\x00garbage\x01").await;
    remote.send_raw(receive_addr, b"").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    agent.ping().await.unwrap();

    // The stray reply must not satisfy a later request
    let answer = async {
        remote.recv().await;
        remote
            .reply(receive_addr, TEMPO, vec![OscArg::Float(120.0)])
            .await;
    };
    let (response, ()) = tokio::join!(agent.relay(TEMPO, vec![]), answer);
    assert_eq!(
        response.unwrap(),
        Response::success(TEMPO, vec![OscArg::Float(120.0)])
    );

    daemon.shutdown().await.unwrap();
}

#[tokio::test]
async fn reply_inside_bundle_resolves() {
    let (daemon, remote) = start(Duration::from_secs(5)).await;
    let mut agent = client(&daemon).await;
    let receive_addr = daemon.receive_addr;

    let answer = async {
        remote.recv().await;
        let inner = OscMessage::new(TEMPO, vec![OscArg::Double(99.5)])
            .encode()
            .unwrap();
        let mut bundle = BytesMut::new();
        bundle.put_slice(b"#bundle\0");
        bundle.put_u64(1);
        bundle.put_i32(inner.len() as i32);
        bundle.put_slice(&inner);
        remote.send_raw(receive_addr, &bundle).await;
    };

    let (response, ()) = tokio::join!(agent.relay(TEMPO, vec![]), answer);
    assert_eq!(
        response.unwrap(),
        Response::success(TEMPO, vec![OscArg::Double(99.5)])
    );

    daemon.shutdown().await.unwrap();
}

#[tokio::test]
async fn commands_on_one_connection_are_sequential() {
    let (daemon, remote) = start(Duration::from_secs(5)).await;
    let mut agent = client(&daemon).await;

    for tempo in [100, 110, 120] {
        let response = agent
            .relay("/live/song/set/tempo", vec![OscArg::Int(tempo)])
            .await
            .unwrap();
        assert_eq!(response, Response::sent("/live/song/set/tempo"));
    }
    for tempo in [100, 110, 120] {
        assert_eq!(remote.recv().await.args, vec![OscArg::Int(tempo)]);
    }

    daemon.shutdown().await.unwrap();
}

#[tokio::test]
async fn bare_namespace_root() {
    let remote = FakeRemote::bind().await;
    let mut config = common::config_for(remote.addr(), Duration::from_secs(5), WaiterPolicy::Fifo);
    config.correlation.address_root = String::new();
    let daemon = Daemon::bind(&config).await.unwrap().spawn();
    let mut agent = client(&daemon).await;
    let receive_addr = daemon.receive_addr;

    let answer = async {
        remote.recv().await;
        remote
            .reply(receive_addr, "/song/get/tempo", vec![OscArg::Float(120.0)])
            .await;
    };
    let (response, ()) = tokio::join!(agent.relay("/song/get/tempo", vec![]), answer);
    assert_eq!(
        response.unwrap(),
        Response::success("/song/get/tempo", vec![OscArg::Float(120.0)])
    );

    let response = agent
        .relay("/song/set/tempo", vec![OscArg::Float(128.0)])
        .await
        .unwrap();
    assert_eq!(response, Response::sent("/song/set/tempo"));

    daemon.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_releases_ports() {
    let (daemon, _remote) = start(Duration::from_secs(5)).await;
    let command_addr = daemon.command_addr;
    let receive_addr = daemon.receive_addr;

    daemon.shutdown().await.unwrap();

    assert!(TcpStream::connect(command_addr).await.is_err());
    UdpSocket::bind(receive_addr).await.unwrap();
}

#[tokio::test]
async fn occupied_receive_port_fails_startup() {
    let squatter = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let remote = FakeRemote::bind().await;
    let mut config = common::config_for(remote.addr(), Duration::from_secs(5), WaiterPolicy::Fifo);
    config.receive.port = squatter.local_addr().unwrap().port();

    let err = Daemon::bind(&config).await.err().expect("bind should fail");
    assert!(err.to_string().contains("receive port"), "{err:#}");
}
