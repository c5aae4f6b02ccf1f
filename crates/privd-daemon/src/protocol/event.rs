//! Typed lifecycle events delivered to service workers.
//!
//! The event set is closed: a connection is Accepted once, Read/Write any
//! number of times, and Closed once. Events are owned by the worker only for
//! the duration of processing and are never persisted.

use bytes::Bytes;
use tokio::sync::mpsc;

use super::credentials::PeerCredentials;

/// Opaque per-connection identifier, unique for the daemon's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Commands the worker queues towards a connection's writer task.
#[derive(Debug)]
pub enum OutboundCmd {
    /// Write these bytes, preserving queue order.
    Data(Bytes),
    /// Shut down the write side; used when the worker closes a connection.
    Shutdown,
}

/// A lifecycle event for one connection of one service.
#[derive(Debug)]
pub enum ServiceEvent {
    /// A new connection was accepted on one of the service's sockets.
    Accept {
        /// The new connection.
        conn: ConnectionId,
        /// Which of the service's sockets accepted it.
        interface: u32,
        /// Trusted peer identity.
        creds: PeerCredentials,
        /// Queue towards the connection's writer task.
        outbound: mpsc::UnboundedSender<OutboundCmd>,
    },
    /// Bytes arrived on a connection.
    Read {
        /// The connection.
        conn: ConnectionId,
        /// The bytes read; may hold a partial frame or several frames.
        data: Bytes,
    },
    /// The writer task drained one queued response.
    Write {
        /// The connection.
        conn: ConnectionId,
        /// Responses still queued behind this one.
        unsent: usize,
    },
    /// The connection is gone; all its buffered state must be discarded.
    Close {
        /// The connection.
        conn: ConnectionId,
    },
}

impl ServiceEvent {
    /// The connection this event belongs to.
    #[must_use]
    pub const fn connection(&self) -> ConnectionId {
        match self {
            Self::Accept { conn, .. }
            | Self::Read { conn, .. }
            | Self::Write { conn, .. }
            | Self::Close { conn } => *conn,
        }
    }
}
