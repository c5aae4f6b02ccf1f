//! The socket-service framework.
//!
//! One [`SocketManager`] owns every registered service's sockets. Each
//! service gets a dedicated worker task consuming typed lifecycle events;
//! the manager's accept and connection tasks only classify transport
//! readiness into events and never block on service logic.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        SocketManager                         │
//! │   accept loop (per socket)                                   │
//! │        │  Accept ─────────────────────────┐                  │
//! │        ▼                                  ▼                  │
//! │   connection reader ── Read ──► service event queue          │
//! │   connection writer ── Write ──►      │                      │
//! │        │  Close ──────────────────────┤                      │
//! │        ▼                              ▼                      │
//! │                              service worker task             │
//! │                        (sole owner of connection state)      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Ordering guarantees
//!
//! Events for one connection are delivered and processed in arrival order;
//! the single worker per service means no two events for the same connection
//! are ever in flight concurrently. Across connections only first-come
//! dispatch order holds.
//!
//! # Module Overview
//!
//! - [`credentials`]: trusted peer identity from `SO_PEERCRED`
//! - [`event`]: the closed [`ServiceEvent`] set and connection ids
//! - [`dispatch`]: the [`SocketService`] trait and per-service worker loop
//! - [`socket_manager`]: socket binding, accept loops, and the daemon main
//!   loop

pub mod credentials;
pub mod dispatch;
pub mod event;
pub mod socket_manager;

pub use credentials::PeerCredentials;
pub use dispatch::{ConnectionInfo, ServiceDescription, SocketService};
pub use event::{ConnectionId, OutboundCmd, ServiceEvent};
pub use socket_manager::SocketManager;
