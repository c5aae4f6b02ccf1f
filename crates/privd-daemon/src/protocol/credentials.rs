//! Peer credential retrieval for Unix-socket connections.
//!
//! The kernel reports the connecting process's uid/gid/pid via
//! `SO_PEERCRED`. These are trusted: they come from the transport, not from
//! anything the client sent, and every privilege-sensitive operation is
//! authorized against them.

use std::io;

use tokio::net::UnixStream;

/// Credentials of the process on the other end of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerCredentials {
    /// Effective user id of the peer.
    pub uid: u32,
    /// Effective group id of the peer.
    pub gid: u32,
    /// Process id of the peer.
    pub pid: i32,
}

impl PeerCredentials {
    /// Extract peer credentials from an accepted stream.
    ///
    /// # Errors
    ///
    /// Returns the underlying `getsockopt` error; a connection whose peer
    /// cannot be identified must not be served.
    pub fn from_stream(stream: &UnixStream) -> io::Result<Self> {
        let creds =
            nix::sys::socket::getsockopt(stream, nix::sys::socket::sockopt::PeerCredentials)
                .map_err(io::Error::from)?;
        Ok(Self {
            uid: creds.uid(),
            gid: creds.gid(),
            pid: creds.pid(),
        })
    }

    /// Returns `true` if the peer runs as root.
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.uid == 0
    }
}
