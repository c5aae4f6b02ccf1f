//! Protocol error types for the UDS protocol layer.
//!
//! Structured error types for protocol-level failures, so callers can branch
//! on the failure mode. A *protocol violation* means the peer sent something
//! the protocol forbids and the connection must be closed; other failures are
//! transport-level and leave the peer blameless.

use std::io;

use thiserror::Error;

/// Maximum frame size in bytes (1 MiB).
///
/// Frames are capped to prevent memory exhaustion from a hostile length
/// prefix. The limit is validated before any payload allocation.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Size of the frame length prefix in bytes (big-endian `u32`).
pub const LEN_PREFIX_SIZE: usize = 4;

/// Protocol errors for the UDS protocol layer.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds the maximum allowed size.
    ///
    /// Detected from the length prefix BEFORE allocation.
    #[error("frame too large: {size} bytes exceeds maximum {max} bytes")]
    FrameTooLarge {
        /// Frame size claimed by the length prefix.
        size: usize,
        /// Maximum allowed frame size.
        max: usize,
    },

    /// Frame payload is empty (a frame must carry at least the tag byte).
    #[error("empty frame")]
    EmptyFrame,

    /// The message tag does not name a known message type.
    #[error("unknown message tag: {tag}")]
    UnknownMessageTag {
        /// The offending tag byte.
        tag: u8,
    },

    /// The message body could not be decoded.
    #[error("malformed message body: {reason}")]
    Decode {
        /// Description of the decode failure.
        reason: String,
    },

    /// A message body could not be encoded.
    #[error("failed to encode message: {reason}")]
    Encode {
        /// Description of the encode failure.
        reason: String,
    },

    /// Underlying I/O error from the transport.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ProtocolError {
    /// Create a decode error.
    #[must_use]
    pub fn decode(reason: impl Into<String>) -> Self {
        Self::Decode {
            reason: reason.into(),
        }
    }

    /// Create an encode error.
    #[must_use]
    pub fn encode(reason: impl Into<String>) -> Self {
        Self::Encode {
            reason: reason.into(),
        }
    }

    /// Returns `true` if this error indicates a protocol violation by the
    /// peer.
    ///
    /// Protocol violations indicate a buggy or malicious client; the
    /// connection must be closed without a response.
    #[must_use]
    pub const fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::FrameTooLarge { .. }
                | Self::EmptyFrame
                | Self::UnknownMessageTag { .. }
                | Self::Decode { .. }
        )
    }
}

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
