//! Wire protocol shared by the daemon and its clients.
//!
//! The protocol stack is organized in layers:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Application Messages            │  tag byte + bincode body
//! ├─────────────────────────────────────────┤
//! │              Framing                    │  length-prefixed
//! ├─────────────────────────────────────────┤
//! │            UDS Transport                │  Unix socket
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Wire Format
//!
//! Messages use length-prefixed binary framing:
//!
//! ```text
//! +----------------------------+------------------+
//! | Length (4 bytes, BE)       | Payload          |
//! +----------------------------+------------------+
//! ```
//!
//! - Maximum frame size: 1 MiB, validated against the prefix BEFORE any
//!   payload allocation
//! - Payload: one message-tag byte followed by a bincode-encoded body
//!
//! # Module Overview
//!
//! - [`error`]: protocol error types ([`ProtocolError`], [`ProtocolResult`])
//! - [`frame`]: frame encoding and the [`MessageBuffer`] partial-frame
//!   accumulator owned by each connection
//! - [`messages`]: the closed request/response message set and status codes

pub mod error;
pub mod frame;
pub mod messages;

pub use error::{ProtocolError, ProtocolResult, LEN_PREFIX_SIZE, MAX_FRAME_SIZE};
pub use frame::{encode_frame, MessageBuffer};
pub use messages::{MessageTag, Request, Response, StatusCode};
