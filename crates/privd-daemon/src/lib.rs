//! privd-daemon - privilege broker daemon library.
//!
//! The daemon answers per-application, per-user access-control queries and
//! mutations from untrusted local clients over Unix domain sockets. It is
//! built from two subsystems:
//!
//! - [`store`]: the transactional privilege store, a prepared-statement-backed
//!   SQLite layer enforcing the referential and atomicity invariants over the
//!   app/package/privilege/group relationships.
//! - [`protocol`]: the socket-service framework: a [`protocol::SocketManager`]
//!   multiplexing all registered services' sockets, and one worker task per
//!   service consuming typed Accept/Read/Write/Close events.
//!
//! [`service`] wires the two together: the privilege-manager service decodes
//! requests, executes them against the store under transactional guarantees,
//! and encodes responses back through the connection's buffered state.
//!
//! # Runtime Requirements
//!
//! The socket framework expects a **multi-threaded tokio runtime**: service
//! workers execute synchronous SQLite calls inline, which is acceptable only
//! when other worker threads keep the reactor responsive. The `privd` binary
//! configures the runtime accordingly.

pub mod protocol;
pub mod service;
pub mod store;
