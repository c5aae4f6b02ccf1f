//! Per-service event dispatch.
//!
//! Each registered service runs one worker task owning that service's entire
//! connection table. The worker serializes all processing for the service,
//! so [`SocketService::process`] needs no internal locking against itself:
//! events for one connection are handled in arrival order and never
//! concurrently.
//!
//! The worker drives the full request path: feed read bytes into the
//! connection's [`MessageBuffer`], extract every complete frame (several may
//! arrive in one read), hand each to the service, frame the response, and
//! queue it on the connection's writer. A protocol violation from framing or
//! from the service closes that connection only; other connections are
//! untouched.

use std::collections::HashMap;
use std::path::PathBuf;

use bytes::Bytes;
use privd_core::protocol::{encode_frame, MessageBuffer, ProtocolError};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::credentials::PeerCredentials;
use super::event::{ConnectionId, OutboundCmd, ServiceEvent};

/// One socket a service listens on.
///
/// A service may expose several sockets; the `interface` id tells its
/// handler which one a connection arrived through.
#[derive(Debug, Clone)]
pub struct ServiceDescription {
    /// Human-readable name, used in logs.
    pub name: String,
    /// Interface id delivered with every Accept on this socket.
    pub interface: u32,
    /// Filesystem path of the socket.
    pub socket_path: PathBuf,
}

/// Everything a handler may know about the connection a request came from.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionInfo {
    /// The connection id.
    pub id: ConnectionId,
    /// Which of the service's sockets accepted the connection.
    pub interface: u32,
    /// Trusted peer identity, resolved at accept time.
    pub creds: PeerCredentials,
}

/// A registered unit of the daemon owning its own socket(s).
///
/// `process` receives one complete frame payload and returns the response
/// payload. Handler-level failures (store errors, denied operations) must be
/// encoded into the response so the connection stays open; returning `Err`
/// means the peer violated the protocol and the connection is closed without
/// a reply.
pub trait SocketService: Send + 'static {
    /// Service name for logs and thread naming.
    fn name(&self) -> &'static str;

    /// The sockets this service listens on.
    fn descriptions(&self) -> Vec<ServiceDescription>;

    /// Handle one complete request frame.
    ///
    /// # Errors
    ///
    /// An `Err` is treated as a protocol violation: the connection is closed
    /// and any partially accumulated inbound state is discarded.
    fn process(&mut self, conn: &ConnectionInfo, request: Bytes) -> Result<Bytes, ProtocolError>;
}

/// Connection lifecycle within a worker.
///
/// `Accepted` becomes `Active` on the first Read; Close (or a fatal decode
/// error) removes the entry entirely, which is the `Closed` state. No
/// transitions are possible from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnPhase {
    Accepted,
    Active,
}

struct ConnectionEntry {
    info: ConnectionInfo,
    phase: ConnPhase,
    buffer: MessageBuffer,
    outbound: mpsc::UnboundedSender<OutboundCmd>,
}

/// Run one service's worker loop until its event channel closes.
///
/// Spawned by the socket manager at registration time; the loop is the sole
/// consumer of the service's event queue.
pub(crate) async fn run_worker(
    mut service: Box<dyn SocketService>,
    mut events: mpsc::UnboundedReceiver<ServiceEvent>,
) {
    let name = service.name();
    let mut connections: HashMap<ConnectionId, ConnectionEntry> = HashMap::new();
    debug!(service = name, "service worker started");

    while let Some(event) = events.recv().await {
        match event {
            ServiceEvent::Accept {
                conn,
                interface,
                creds,
                outbound,
            } => {
                trace!(service = name, %conn, interface, uid = creds.uid, "accept");
                connections.insert(
                    conn,
                    ConnectionEntry {
                        info: ConnectionInfo {
                            id: conn,
                            interface,
                            creds,
                        },
                        phase: ConnPhase::Accepted,
                        buffer: MessageBuffer::new(),
                        outbound,
                    },
                );
            }
            ServiceEvent::Read { conn, data } => {
                let Some(entry) = connections.get_mut(&conn) else {
                    // Already closed by the worker; late reads are dropped.
                    trace!(service = name, %conn, "read for closed connection");
                    continue;
                };
                entry.phase = ConnPhase::Active;
                entry.buffer.feed(&data);
                if let Err(error) = drain_requests(&mut *service, entry) {
                    debug!(service = name, %conn, %error, "closing connection");
                    close_connection(&mut connections, conn);
                }
            }
            ServiceEvent::Write { conn, unsent } => {
                trace!(service = name, %conn, unsent, "write drained");
            }
            ServiceEvent::Close { conn } => {
                // Buffers (and any request mid-decode) go with the entry.
                if connections.remove(&conn).is_some() {
                    trace!(service = name, %conn, "closed");
                }
            }
        }
    }

    debug!(service = name, "service worker stopped");
}

/// Extract and process every complete frame currently buffered.
fn drain_requests(
    service: &mut dyn SocketService,
    entry: &mut ConnectionEntry,
) -> Result<(), ProtocolError> {
    debug_assert_eq!(entry.phase, ConnPhase::Active);
    while let Some(frame) = entry.buffer.try_extract()? {
        let response = service.process(&entry.info, frame)?;
        let framed = encode_frame(&response)?;
        if entry.outbound.send(OutboundCmd::Data(framed)).is_err() {
            // Writer is gone; the reader's Close event will follow.
            warn!(conn = %entry.info.id, "response dropped, writer gone");
            break;
        }
    }
    Ok(())
}

/// Close a connection from the worker side: shut down its write half and
/// discard all buffered state immediately.
fn close_connection(
    connections: &mut HashMap<ConnectionId, ConnectionEntry>,
    conn: ConnectionId,
) {
    if let Some(entry) = connections.remove(&conn) {
        let _ = entry.outbound.send(OutboundCmd::Shutdown);
    }
}
