//! Outbound framing.
//!
//! ```text
//! +---------------------+---------------------------+
//! | Length (u32, LE)    | Payload (UTF-8 JSON)      |
//! +---------------------+---------------------------+
//! ```
//!
//! The length prefix lets clients split the TCP stream back into exact
//! messages.

use crate::error::TransportError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the length prefix in bytes
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Prefix `payload` with its length.
pub fn encode_frame(payload: &[u8]) -> Result<Bytes, TransportError> {
    let len = u32::try_from(payload.len()).map_err(|_| TransportError::FrameTooLarge {
        size: payload.len(),
    })?;

    let mut frame = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    frame.put_u32_le(len);
    frame.extend_from_slice(payload);
    Ok(frame.freeze())
}

/// Client side: take one complete frame payload off the front of `buf`.
///
/// Returns `None` and leaves `buf` untouched if the frame is not complete yet.
pub fn decode_frame(buf: &mut BytesMut) -> Option<Bytes> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return None;
    }
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    prefix.copy_from_slice(&buf[..LENGTH_PREFIX_SIZE]);
    let len = u32::from_le_bytes(prefix) as usize;

    if buf.len() < LENGTH_PREFIX_SIZE + len {
        return None;
    }
    buf.advance(LENGTH_PREFIX_SIZE);
    Some(buf.split_to(len).freeze())
}
