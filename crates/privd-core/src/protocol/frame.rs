//! Length-prefixed framing and per-connection partial-frame buffering.
//!
//! Each connection owns one [`MessageBuffer`]. Read events feed raw bytes
//! into it; [`MessageBuffer::try_extract`] yields a complete frame payload
//! only once the whole frame has arrived. Partial frames stay buffered across
//! reads, and several frames arriving in one read are all extractable in
//! order.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::error::{ProtocolError, ProtocolResult, LEN_PREFIX_SIZE, MAX_FRAME_SIZE};

/// Encode a single frame: 4-byte big-endian length prefix plus payload.
///
/// # Errors
///
/// Returns [`ProtocolError::FrameTooLarge`] if the payload exceeds
/// [`MAX_FRAME_SIZE`], and [`ProtocolError::EmptyFrame`] for an empty
/// payload.
pub fn encode_frame(payload: &[u8]) -> ProtocolResult<Bytes> {
    if payload.is_empty() {
        return Err(ProtocolError::EmptyFrame);
    }
    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: payload.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    let mut buf = BytesMut::with_capacity(LEN_PREFIX_SIZE + payload.len());
    // Cast is lossless: payload.len() <= MAX_FRAME_SIZE < u32::MAX.
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Inbound partial-frame accumulator for one connection.
///
/// Bytes are appended with [`feed`](Self::feed) as they arrive from the
/// transport; [`try_extract`](Self::try_extract) removes and returns one
/// complete frame payload at a time, leaving incomplete trailing data
/// buffered. Dropping the buffer (on connection close) discards any
/// partially accumulated frame.
#[derive(Debug, Default)]
pub struct MessageBuffer {
    buf: BytesMut,
}

impl MessageBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes received from the transport.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Number of buffered bytes not yet consumed by extraction.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Attempt to extract one complete frame payload.
    ///
    /// Returns `Ok(None)` while the buffered data does not yet contain a
    /// complete frame. The length prefix is validated against
    /// [`MAX_FRAME_SIZE`] before the payload is awaited or copied, so a
    /// hostile prefix cannot drive allocation.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::FrameTooLarge`] or
    /// [`ProtocolError::EmptyFrame`] on a violating prefix; the connection
    /// must be closed, the buffer contents are no longer meaningful.
    pub fn try_extract(&mut self) -> ProtocolResult<Option<Bytes>> {
        if self.buf.len() < LEN_PREFIX_SIZE {
            return Ok(None);
        }

        let declared = {
            let mut prefix = &self.buf[..LEN_PREFIX_SIZE];
            prefix.get_u32() as usize
        };
        if declared == 0 {
            return Err(ProtocolError::EmptyFrame);
        }
        if declared > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: declared,
                max: MAX_FRAME_SIZE,
            });
        }

        if self.buf.len() < LEN_PREFIX_SIZE + declared {
            return Ok(None);
        }

        self.buf.advance(LEN_PREFIX_SIZE);
        Ok(Some(self.buf.split_to(declared).freeze()))
    }
}
