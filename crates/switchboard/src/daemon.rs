//! Daemon wiring: binds the sockets, then runs the receive loop and the
//! command listener until shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use switchconf::BridgeConfig;
use switchproto::AddressCatalog;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::dispatch::{Dispatcher, Endpoints};
use crate::receiver::OscReceiver;
use crate::registry::Registry;
use crate::server::CommandServer;
use crate::transmitter::{OscSink, UdpTransmitter};

/// A daemon with all sockets bound, ready to run.
///
/// Binding happens up front so an occupied port fails startup instead of
/// surfacing later.
pub struct Daemon {
    receiver: OscReceiver,
    server: CommandServer,
    dispatcher: Arc<Dispatcher>,
    registry: Registry,
    command_addr: SocketAddr,
    receive_addr: SocketAddr,
    remote_addr: SocketAddr,
}

impl Daemon {
    pub async fn bind(config: &BridgeConfig) -> Result<Self> {
        config.validate()?;

        let registry = Registry::new(config.correlation.waiter_policy);

        let receiver = OscReceiver::bind(&config.receive_addr(), registry.clone())
            .await
            .with_context(|| format!("Failed to bind OSC receive port {}", config.receive_addr()))?;
        let receive_addr = receiver.local_addr()?;

        let transmitter = UdpTransmitter::connect(&config.remote_addr())
            .await
            .with_context(|| format!("Failed to set up OSC transmitter for {}", config.remote_addr()))?;
        let remote_addr = transmitter.target();

        let server = CommandServer::bind(&config.command_addr(), config.command.max_frame_bytes)
            .await
            .with_context(|| format!("Failed to bind command channel {}", config.command_addr()))?;
        let command_addr = server.local_addr()?;

        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            Arc::new(transmitter),
            AddressCatalog::new(config.correlation.address_root.clone()),
            config.response_timeout(),
            Endpoints {
                remote_host: config.remote.host.clone(),
                remote_port: remote_addr.port(),
                receive_port: receive_addr.port(),
                command_port: command_addr.port(),
            },
        ));

        Ok(Self {
            receiver,
            server,
            dispatcher,
            registry,
            command_addr,
            receive_addr,
            remote_addr,
        })
    }

    pub fn command_addr(&self) -> SocketAddr {
        self.command_addr
    }

    pub fn receive_addr(&self) -> SocketAddr {
        self.receive_addr
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn registry(&self) -> Registry {
        self.registry.clone()
    }

    /// Run until `shutdown` is cancelled. Both sockets are closed on return.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!("🎛️  switchboard running");
        info!("   Command channel: {}", self.command_addr);
        info!("   OSC out: {}", self.remote_addr);
        info!("   OSC replies: {}", self.receive_addr);

        let receive_task = self.receiver.spawn(shutdown.clone());
        self.server.run(self.dispatcher, shutdown.clone()).await;

        // Listener exits only on cancellation; make sure the receiver follows
        shutdown.cancel();
        if let Err(e) = receive_task.await {
            warn!("Receive loop ended abnormally: {}", e);
        }

        let abandoned = self.registry.pending_count();
        if abandoned > 0 {
            info!("{} request(s) still pending at shutdown", abandoned);
        }
        info!("Shutdown complete");
        Ok(())
    }

    /// Run on a background task. Handy for tests and embedding.
    pub fn spawn(self) -> DaemonHandle {
        let shutdown = CancellationToken::new();
        let command_addr = self.command_addr;
        let receive_addr = self.receive_addr;
        let task = tokio::spawn(self.run(shutdown.clone()));
        DaemonHandle {
            command_addr,
            receive_addr,
            shutdown,
            task,
        }
    }
}

/// A daemon running on a background task.
pub struct DaemonHandle {
    pub command_addr: SocketAddr,
    pub receive_addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<Result<()>>,
}

impl DaemonHandle {
    /// Stop accepting connections, release the sockets, and wait.
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown.cancel();
        self.task.await.context("Daemon task panicked")?
    }
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, shutting down...");
        }
        _ = terminate() => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
