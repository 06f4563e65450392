//! CRC16-protected serial framing for lab hardware.
//!
//! Every message on the wire is framed with:
//! - A 2-byte header (`0x59 0x49`) for stream synchronization
//! - A 1-byte payload length (0..=255)
//! - The payload, whose first byte is the message-type tag
//! - A big-endian CRC16 (polynomial 0x1021, init 0) over header, length and payload
//!
//! The decoder is a resumable cursor: each step performs one state
//! transition, and any mismatch sends it back to header search without
//! losing the bytes that followed the bad header.

pub mod codec;
pub mod crc;
pub mod decoder;
pub mod error;
pub mod reader;
#[cfg(feature = "async")]
pub mod serial_codec;
pub mod writer;

pub use codec::{encode, encode_frame, Frame, CRC_SIZE, HEADER, MAX_PAYLOAD, PREFIX_SIZE};
pub use crc::{crc16, crc16_bytes};
pub use decoder::{DecodeState, FrameDecoder};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
#[cfg(feature = "async")]
pub use serial_codec::SerialCodec;
pub use writer::{write_frame, FrameWriter};
