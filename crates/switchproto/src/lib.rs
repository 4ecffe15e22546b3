//! switchproto - wire types for the switchboard OSC bridge
//!
//! - [`osc`]: OSC 1.0 message and bundle codec (UDP side)
//! - [`address`]: classification of remote addresses into reply-bearing and one-way
//! - [`envelope`]: JSON command and response envelopes (agent side)
//! - [`client`]: async command channel client (feature `client`)

pub mod address;
pub mod envelope;
pub mod osc;

#[cfg(feature = "client")]
pub mod client;

pub use address::{AddressCatalog, AddressError, Domain, OscAddress, ReplyExpectation};
pub use envelope::{Command, ErrorKind, OkBody, ProtocolError, Response, StatusSnapshot};
pub use osc::{OscArg, OscBundle, OscError, OscMessage, OscPacket};

#[cfg(feature = "client")]
pub use client::{BridgeClient, ClientError};
