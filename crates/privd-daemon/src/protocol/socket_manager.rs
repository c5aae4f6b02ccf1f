//! Socket multiplexer: binds service sockets, accepts connections, and
//! routes transport readiness to service workers as typed events.
//!
//! The manager performs no service logic of its own. Accept loops and
//! per-connection reader/writer tasks translate the transport into
//! [`ServiceEvent`]s and enqueue them on the owning service's queue; the
//! service worker (see [`super::dispatch`]) is the sole consumer.
//!
//! # Socket hygiene
//!
//! - The runtime directory is created with mode 0700 if missing; an existing
//!   directory's permissions are left alone.
//! - Stale socket files are removed before binding, but only if they really
//!   are sockets.
//! - Socket files get their permissions set after binding and are removed at
//!   shutdown (and best-effort on drop).

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use privd_core::protocol::{ProtocolError, ProtocolResult};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::dispatch::{run_worker, ServiceDescription, SocketService};
use super::event::{ConnectionId, OutboundCmd, ServiceEvent};
use super::PeerCredentials;

/// Permissions applied to every bound socket file (owner + group).
const SOCKET_MODE: u32 = 0o660;

/// Permissions for a runtime directory created by the manager.
const DIRECTORY_MODE: u32 = 0o700;

/// Read chunk size for connection readers.
const READ_CHUNK: usize = 4096;

struct BoundSocket {
    description: ServiceDescription,
    listener: UnixListener,
    events: mpsc::UnboundedSender<ServiceEvent>,
}

/// The daemon's socket multiplexer.
///
/// Register every service, then run [`main_loop`](Self::main_loop); the loop
/// returns after SIGTERM/SIGINT once sockets are cleaned up.
pub struct SocketManager {
    sockets: Vec<BoundSocket>,
    socket_paths: Vec<PathBuf>,
    next_conn: Arc<AtomicU64>,
    accept_tasks: Vec<JoinHandle<()>>,
}

impl SocketManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sockets: Vec::new(),
            socket_paths: Vec::new(),
            next_conn: Arc::new(AtomicU64::new(1)),
            accept_tasks: Vec::new(),
        }
    }

    /// Register a service: bind each of its sockets and spawn its worker.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if a socket directory cannot be prepared, a stale
    /// path cannot be cleared, or binding fails. A service with no
    /// descriptions is rejected.
    pub fn register_service(&mut self, service: Box<dyn SocketService>) -> ProtocolResult<()> {
        let descriptions = service.descriptions();
        if descriptions.is_empty() {
            return Err(ProtocolError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("service {} has no socket descriptions", service.name()),
            )));
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        for description in descriptions {
            if let Some(parent) = description.socket_path.parent() {
                ensure_directory(parent)?;
            }
            cleanup_socket(&description.socket_path)?;

            let listener = UnixListener::bind(&description.socket_path).map_err(|e| {
                ProtocolError::Io(io::Error::new(
                    e.kind(),
                    format!(
                        "failed to bind {} to {}: {e}",
                        description.name,
                        description.socket_path.display()
                    ),
                ))
            })?;
            set_socket_permissions(&description.socket_path, SOCKET_MODE)?;

            info!(
                service = description.name,
                interface = description.interface,
                socket = %description.socket_path.display(),
                "socket bound"
            );
            self.socket_paths.push(description.socket_path.clone());
            self.sockets.push(BoundSocket {
                description,
                listener,
                events: events_tx.clone(),
            });
        }

        tokio::spawn(run_worker(service, events_rx));
        Ok(())
    }

    /// Start accept loops for every bound socket.
    ///
    /// Exposed separately from [`main_loop`](Self::main_loop) so tests can
    /// drive the manager without signal handling.
    pub fn start(&mut self) {
        for socket in self.sockets.drain(..) {
            let counter = Arc::clone(&self.next_conn);
            self.accept_tasks.push(tokio::spawn(accept_loop(
                socket.listener,
                socket.description,
                socket.events,
                counter,
            )));
        }
    }

    /// Run until the process receives SIGTERM or SIGINT, then shut down.
    ///
    /// # Errors
    ///
    /// Returns an error only if signal handlers cannot be installed.
    pub async fn main_loop(mut self) -> ProtocolResult<()> {
        self.start();

        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        let mut sigint =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;
        tokio::select! {
            _ = sigterm.recv() => info!("SIGTERM received, shutting down"),
            _ = sigint.recv() => info!("SIGINT received, shutting down"),
        }

        self.shutdown();
        Ok(())
    }

    /// Stop accepting and remove socket files.
    pub fn shutdown(&mut self) {
        for task in self.accept_tasks.drain(..) {
            task.abort();
        }
        for path in self.socket_paths.drain(..) {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!(socket = %path.display(), "failed to remove socket file: {e}");
                } else {
                    debug!(socket = %path.display(), "socket file removed");
                }
            }
        }
    }
}

impl Default for SocketManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SocketManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Ensure a runtime directory exists.
///
/// Newly created directories get mode 0700; an existing directory is used
/// as-is but symlinks are refused.
fn ensure_directory(path: &Path) -> ProtocolResult<()> {
    match std::fs::symlink_metadata(path) {
        Ok(metadata) => {
            if metadata.file_type().is_symlink() {
                return Err(ProtocolError::Io(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!(
                        "{} is a symlink, refusing to use as socket directory",
                        path.display()
                    ),
                )));
            }
            if !metadata.is_dir() {
                return Err(ProtocolError::Io(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} exists but is not a directory", path.display()),
                )));
            }
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            std::fs::create_dir_all(path)?;
            let perms = {
                use std::os::unix::fs::PermissionsExt;
                std::fs::Permissions::from_mode(DIRECTORY_MODE)
            };
            std::fs::set_permissions(path, perms)?;
            Ok(())
        }
        Err(e) => Err(ProtocolError::Io(e)),
    }
}

/// Remove a stale socket file, refusing to delete anything that is not a
/// socket.
fn cleanup_socket(path: &Path) -> ProtocolResult<()> {
    match std::fs::symlink_metadata(path) {
        Ok(metadata) => {
            use std::os::unix::fs::FileTypeExt;
            if !metadata.file_type().is_socket() {
                return Err(ProtocolError::Io(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("path {} exists but is not a socket", path.display()),
                )));
            }
            std::fs::remove_file(path)?;
            debug!(path = %path.display(), "removed stale socket file");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ProtocolError::Io(e)),
    }
}

fn set_socket_permissions(path: &Path, mode: u32) -> ProtocolResult<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

/// Accept connections on one socket until the listener is dropped.
async fn accept_loop(
    listener: UnixListener,
    description: ServiceDescription,
    events: mpsc::UnboundedSender<ServiceEvent>,
    counter: Arc<AtomicU64>,
) {
    loop {
        let stream = match listener.accept().await {
            Ok((stream, _addr)) => stream,
            Err(e) => {
                warn!(service = description.name, "accept failed: {e}");
                continue;
            }
        };

        let creds = match PeerCredentials::from_stream(&stream) {
            Ok(creds) => creds,
            Err(e) => {
                warn!(
                    service = description.name,
                    "dropping connection without credentials: {e}"
                );
                continue;
            }
        };

        let conn = ConnectionId::new(counter.fetch_add(1, Ordering::Relaxed));
        debug!(
            service = description.name,
            %conn,
            uid = creds.uid,
            gid = creds.gid,
            pid = creds.pid,
            "connection accepted"
        );
        spawn_connection(conn, description.interface, creds, stream, &events);
    }
}

/// Wire up one accepted connection: announce it to the worker and spawn its
/// reader and writer tasks.
fn spawn_connection(
    conn: ConnectionId,
    interface: u32,
    creds: PeerCredentials,
    stream: UnixStream,
    events: &mpsc::UnboundedSender<ServiceEvent>,
) {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    if events
        .send(ServiceEvent::Accept {
            conn,
            interface,
            creds,
            outbound: out_tx,
        })
        .is_err()
    {
        // Worker already gone; nothing will ever process this connection.
        return;
    }

    let (read_half, write_half) = stream.into_split();
    tokio::spawn(connection_reader(conn, read_half, events.clone()));
    tokio::spawn(connection_writer(conn, write_half, out_rx, events.clone()));
}

/// Forward raw reads as Read events; emit Close on EOF or error.
async fn connection_reader(
    conn: ConnectionId,
    mut read_half: OwnedReadHalf,
    events: mpsc::UnboundedSender<ServiceEvent>,
) {
    loop {
        let mut data = BytesMut::with_capacity(READ_CHUNK);
        match read_half.read_buf(&mut data).await {
            Ok(0) => break,
            Ok(_) => {
                if events
                    .send(ServiceEvent::Read {
                        conn,
                        data: data.freeze(),
                    })
                    .is_err()
                {
                    return;
                }
            }
            Err(e) => {
                debug!(%conn, "read error: {e}");
                break;
            }
        }
    }
    let _ = events.send(ServiceEvent::Close { conn });
}

/// Drain the outbound queue into the socket, reporting each completed write.
async fn connection_writer(
    conn: ConnectionId,
    mut write_half: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<OutboundCmd>,
    events: mpsc::UnboundedSender<ServiceEvent>,
) {
    while let Some(cmd) = outbound.recv().await {
        match cmd {
            OutboundCmd::Data(bytes) => {
                if let Err(e) = write_half.write_all(&bytes).await {
                    debug!(%conn, "write error: {e}");
                    let _ = events.send(ServiceEvent::Close { conn });
                    return;
                }
                let _ = events.send(ServiceEvent::Write {
                    conn,
                    unsent: outbound.len(),
                });
            }
            OutboundCmd::Shutdown => {
                let _ = write_half.shutdown().await;
                return;
            }
        }
    }
}
