//! Wire format for loopback video packets.
//!
//! ```text
//! +-------+--------+--------------+-------------+---------+
//! | width | height | timestamp_us | payload_len | payload |
//! |  u32  |  u32   |     u64      |     u32     |   ...   |
//! +-------+--------+--------------+-------------+---------+
//! ```
//!
//! All integers are big-endian.

use crate::session::VideoFrame;

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the fixed packet header in bytes.
pub const HEADER_SIZE: usize = 20;

/// Error type for loopback packet decoding.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    /// Packet shorter than its header or declared payload.
    #[error("Insufficient data: need {needed} bytes, have {available}")]
    InsufficientData { needed: usize, available: usize },

    /// Payload does not fit the length field.
    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),
}

/// Encode a video frame into a loopback packet.
///
/// # Errors
///
/// Returns `CodecError::PayloadTooLarge` if the payload exceeds `u32::MAX`
/// bytes.
pub fn encode_frame(frame: &VideoFrame) -> Result<Bytes, CodecError> {
    let payload_len = u32::try_from(frame.data.len())
        .map_err(|_| CodecError::PayloadTooLarge(frame.data.len()))?;

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + frame.data.len());
    buf.put_u32(frame.width);
    buf.put_u32(frame.height);
    buf.put_u64(frame.timestamp_us);
    buf.put_u32(payload_len);
    buf.extend_from_slice(&frame.data);

    Ok(buf.freeze())
}

/// Decode a loopback packet into a video frame.
///
/// The payload is sliced out of `packet` without copying.
///
/// # Errors
///
/// Returns `CodecError::InsufficientData` for truncated packets.
pub fn decode_frame(mut packet: Bytes) -> Result<VideoFrame, CodecError> {
    if packet.remaining() < HEADER_SIZE {
        return Err(CodecError::InsufficientData {
            needed: HEADER_SIZE,
            available: packet.remaining(),
        });
    }

    let width = packet.get_u32();
    let height = packet.get_u32();
    let timestamp_us = packet.get_u64();
    let payload_len = packet.get_u32() as usize;

    if packet.remaining() < payload_len {
        return Err(CodecError::InsufficientData {
            needed: HEADER_SIZE + payload_len,
            available: HEADER_SIZE + packet.remaining(),
        });
    }

    Ok(VideoFrame {
        width,
        height,
        timestamp_us,
        data: packet.split_to(payload_len),
    })
}
