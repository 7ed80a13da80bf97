//! TCP transport layer for gamelink.
//!
//! Two sides, one wire format (length-prefixed frames from
//! `gamelink-protocol`):
//!
//! - **Server**: [`ServerListener`] accepts sockets on the Tokio runtime;
//!   each becomes a [`Connection`] that handlers use to reply.
//! - **Client**: [`ClientTransport`] owns one socket and does all of its
//!   I/O inside a per-frame [`tick`](ClientTransport::tick), without
//!   blocking or spawning threads.

mod client;
mod close;
mod config;
mod connection;
mod error;
mod listener;

pub use client::{ClientEvent, ClientTransport, ConnectResult, ConnectionState};
pub use close::CloseReason;
pub use config::{ClientConfig, DEFAULT_RECV_BUFFER_SIZE};
pub use connection::Connection;
pub use error::TransportError;
pub use listener::ServerListener;

use std::fmt;

/// The codec both sides put inside each frame.
pub type WireCodec = gamelink_protocol::JsonCodec;

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}
