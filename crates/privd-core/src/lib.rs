//! privd-core - shared material between the privilege broker daemon and its
//! clients.
//!
//! This crate carries everything both sides of the Unix-socket boundary need
//! to agree on:
//!
//! - [`protocol`]: wire message types, length-prefixed framing, and the
//!   partial-frame [`protocol::MessageBuffer`] used by connection state
//! - [`config`]: daemon configuration loaded from a TOML file
//!
//! The daemon itself (store, socket multiplexer, service dispatch) lives in
//! `privd-daemon`.

pub mod config;
pub mod protocol;
