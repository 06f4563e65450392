use bytes::{BufMut, Bytes, BytesMut};

use crate::crc::crc16;
use crate::error::{FrameError, Result};

/// Header bytes that open every frame ("YI").
pub const HEADER: [u8; 2] = [0x59, 0x49];

/// Header plus the length byte.
pub const PREFIX_SIZE: usize = 3;

/// Trailing CRC bytes.
pub const CRC_SIZE: usize = 2;

/// The length field is a single byte.
pub const MAX_PAYLOAD: usize = u8::MAX as usize;

/// A decoded serial frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The message payload. The first byte, when present, is the message-type tag.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// Message-type tag (first payload byte).
    pub fn tag(&self) -> Option<u8> {
        self.payload.first().copied()
    }

    /// Event topic for this frame on the given channel.
    ///
    /// Frames with a tag publish under `"{channel}/0x{tag:02X}"`; empty
    /// frames publish under the bare channel name.
    pub fn topic(&self, channel: &str) -> String {
        match self.tag() {
            Some(tag) => format!("{channel}/0x{tag:02X}"),
            None => channel.to_string(),
        }
    }

    /// The total wire size of this frame.
    pub fn wire_size(&self) -> usize {
        PREFIX_SIZE + self.payload.len() + CRC_SIZE
    }
}

/// Encode a payload into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────┬──────────┬──────────────────┬────────────────┐
/// │ Header (2B)  │ Len (1B) │ Payload          │ CRC16 (2B BE)  │
/// │ 0x59 0x49    │ N        │ (N bytes)        │ over hdr..data │
/// └──────────────┴──────────┴──────────────────┴────────────────┘
/// ```
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD,
        });
    }
    let start = dst.len();
    dst.reserve(PREFIX_SIZE + payload.len() + CRC_SIZE);
    dst.put_slice(&HEADER);
    dst.put_u8(payload.len() as u8);
    dst.put_slice(payload);
    let crc = crc16(&dst[start..]);
    dst.put_u16(crc);
    Ok(())
}

/// Encode a payload into a freshly allocated buffer.
pub fn encode(payload: &[u8]) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(PREFIX_SIZE + payload.len() + CRC_SIZE);
    encode_frame(payload, &mut buf)?;
    Ok(buf.freeze())
}
