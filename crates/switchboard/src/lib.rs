//! switchboard - OSC bridge daemon
//!
//! Accepts JSON commands from an agent over TCP, relays them as OSC datagrams
//! to a remote application, and correlates the application's replies back to
//! the request that asked for them.
//!
//! ```text
//! agent ──JSON/TCP──▶ server ─▶ dispatch ──OSC/UDP──▶ remote app
//!                                  ▲                      │
//!                                  └─ registry ◀─ receiver ◀┘
//! ```

pub mod commands;
pub mod daemon;
pub mod dispatch;
pub mod receiver;
pub mod registry;
pub mod server;
pub mod telemetry;
pub mod transmitter;

pub use daemon::{Daemon, DaemonHandle};
pub use dispatch::{Dispatcher, Endpoints};
pub use registry::{CorrelationError, Registry, Resolution, Waiter};
pub use transmitter::{OscSink, TransportError, UdpTransmitter};
