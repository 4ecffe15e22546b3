//! switchboard - OSC bridge daemon and CLI
//!
//! Subcommands:
//! - `switchboard serve` - Run the daemon (JSON over TCP → OSC over UDP)
//! - `switchboard ping` - Check the daemon answers
//! - `switchboard status` - Show daemon configuration and pending requests
//! - `switchboard send <address> [args...]` - Relay one OSC message
//! - `switchboard config` - Print the effective configuration

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use switchconf::{BridgeConfig, WaiterPolicy};
use tokio_util::sync::CancellationToken;
use tracing::info;

use switchboard::{commands, daemon, telemetry};

#[derive(Parser)]
#[command(name = "switchboard")]
#[command(about = "Bridge JSON commands to OSC and correlate the replies")]
#[command(version)]
struct Cli {
    /// Config file (replaces ./switchboard.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge daemon
    Serve {
        /// Command channel bind host
        #[arg(long)]
        socket_host: Option<String>,

        /// Command channel bind port
        #[arg(long)]
        socket_port: Option<u16>,

        /// Remote application host
        #[arg(long)]
        ableton_host: Option<String>,

        /// Remote application OSC port
        #[arg(long)]
        ableton_port: Option<u16>,

        /// Local port for OSC replies
        #[arg(long)]
        receive_port: Option<u16>,

        /// Reply timeout in seconds
        #[arg(short, long)]
        timeout: Option<f64>,

        /// What to do with a second request for an address already waiting
        #[arg(long, value_parser = parse_policy)]
        waiter_policy: Option<WaiterPolicy>,

        /// OTLP gRPC endpoint for OpenTelemetry (e.g., "localhost:4317")
        #[arg(long)]
        otlp_endpoint: Option<String>,

        /// Debug-level logging
        #[arg(short, long)]
        verbose: bool,
    },

    /// Check the daemon answers
    Ping {
        /// Daemon address (defaults to the configured command channel)
        #[arg(short, long)]
        daemon: Option<String>,

        /// Timeout in milliseconds
        #[arg(long, default_value = "2000")]
        timeout_ms: u64,
    },

    /// Show daemon status
    Status {
        #[arg(short, long)]
        daemon: Option<String>,

        #[arg(long, default_value = "2000")]
        timeout_ms: u64,
    },

    /// Relay one OSC message through the daemon
    Send {
        /// OSC address, e.g. /live/song/get/tempo
        address: String,

        /// Arguments; numbers and true/false are typed, `s:` forces a string
        args: Vec<String>,

        #[arg(short, long)]
        daemon: Option<String>,

        /// Timeout in milliseconds (should exceed the daemon's reply timeout)
        #[arg(long, default_value = "10000")]
        timeout_ms: u64,
    },

    /// Print the effective configuration as TOML
    Config,
}

fn parse_policy(s: &str) -> std::result::Result<WaiterPolicy, String> {
    s.parse()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, sources) = BridgeConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;

    match cli.command {
        Commands::Serve {
            socket_host,
            socket_port,
            ableton_host,
            ableton_port,
            receive_port,
            timeout,
            waiter_policy,
            otlp_endpoint,
            verbose,
        } => {
            if let Some(v) = socket_host {
                config.command.host = v;
            }
            if let Some(v) = socket_port {
                config.command.port = v;
            }
            if let Some(v) = ableton_host {
                config.remote.host = v;
            }
            if let Some(v) = ableton_port {
                config.remote.port = v;
            }
            if let Some(v) = receive_port {
                config.receive.port = v;
            }
            if let Some(v) = timeout {
                config.correlation.timeout_secs = v;
            }
            if let Some(v) = waiter_policy {
                config.correlation.waiter_policy = v;
            }
            if let Some(v) = otlp_endpoint {
                config.telemetry.otlp_endpoint = v;
            }
            if verbose {
                config.telemetry.log_level = "debug".to_string();
            }
            config.validate()?;

            telemetry::init(&config.telemetry)?;
            serve(config).await?;
        }
        Commands::Ping { daemon, timeout_ms } => {
            telemetry::init_cli();
            let daemon = daemon.unwrap_or_else(|| config.command_addr());
            commands::ping(&daemon, Duration::from_millis(timeout_ms)).await?;
        }
        Commands::Status { daemon, timeout_ms } => {
            telemetry::init_cli();
            let daemon = daemon.unwrap_or_else(|| config.command_addr());
            commands::status(&daemon, Duration::from_millis(timeout_ms)).await?;
        }
        Commands::Send {
            address,
            args,
            daemon,
            timeout_ms,
        } => {
            telemetry::init_cli();
            let daemon = daemon.unwrap_or_else(|| config.command_addr());
            commands::send(&daemon, &address, &args, Duration::from_millis(timeout_ms)).await?;
        }
        Commands::Config => {
            print!("{}", config.to_toml());
            println!();
            if sources.files.is_empty() {
                println!("# sources: compiled defaults");
            }
            for file in &sources.files {
                println!("# file: {}", file.display());
            }
            for var in &sources.env_overrides {
                println!("# env: {}", var);
            }
        }
    }

    Ok(())
}

async fn serve(config: BridgeConfig) -> Result<()> {
    info!("🎛️  switchboard {} starting", env!("CARGO_PKG_VERSION"));

    let daemon = daemon::Daemon::bind(&config).await?;

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        daemon::shutdown_signal().await;
        trigger.cancel();
    });

    daemon.run(shutdown).await
}
