//! CLI command implementations

use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use switchproto::{BridgeClient, OscArg, Response};

async fn connect(daemon: &str, timeout: Duration) -> Result<BridgeClient> {
    BridgeClient::connect(daemon, timeout)
        .await
        .with_context(|| format!("Is the daemon running on {}?", daemon))
}

/// Round-trip a ping through the command channel
pub async fn ping(daemon: &str, timeout: Duration) -> Result<()> {
    let mut client = connect(daemon, timeout).await?;

    let start = Instant::now();
    client.ping().await?;
    println!("Pong from {} in {:?}", client.peer_addr(), start.elapsed());
    Ok(())
}

/// Print the daemon's status as JSON
pub async fn status(daemon: &str, timeout: Duration) -> Result<()> {
    let mut client = connect(daemon, timeout).await?;
    let snapshot = client.status().await?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

/// Relay one OSC message and print what came back
pub async fn send(daemon: &str, address: &str, args: &[String], timeout: Duration) -> Result<()> {
    let args: Vec<OscArg> = args.iter().map(|a| parse_cli_arg(a)).collect();
    let mut client = connect(daemon, timeout).await?;

    match client.relay(address, args).await? {
        Response::Error { kind, message, .. } => bail!("{} error: {}", kind, message),
        response => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
    }
}

/// Guess the OSC type of a command-line argument.
///
/// Integers become `i` (or `h` when large), decimals `f`, `true`/`false`
/// become 1/0, anything else is a string. Prefix with `s:` to force a
/// string, e.g. `s:42`.
pub fn parse_cli_arg(raw: &str) -> OscArg {
    if let Some(s) = raw.strip_prefix("s:") {
        return OscArg::String(s.to_string());
    }
    if let Ok(v) = raw.parse::<i64>() {
        return OscArg::from_integer(v);
    }
    if let Ok(v) = raw.parse::<f32>() {
        if v.is_finite() {
            return OscArg::Float(v);
        }
    }
    match raw {
        "true" => OscArg::from_bool(true),
        "false" => OscArg::from_bool(false),
        _ => OscArg::String(raw.to_string()),
    }
}
