use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{encode_frame, Frame};
use crate::decoder::FrameDecoder;
use crate::error::FrameError;

/// `tokio_util` codec for the serial frame format.
///
/// Unlike [`FrameReader`](crate::FrameReader), a partially buffered frame
/// waits for more bytes instead of counting as a short read, so this fits
/// links that deliver data in arbitrary chunks.
#[derive(Debug, Default)]
pub struct SerialCodec {
    decoder: FrameDecoder,
}

impl SerialCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times decoding fell back to header search.
    pub fn resyncs(&self) -> u64 {
        self.decoder.resyncs()
    }
}

impl Decoder for SerialCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(self.decoder.decode(src))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decoder.decode(src) {
            return Ok(Some(frame));
        }
        // A truncated trailing frame is line noise, not a stream error.
        src.clear();
        self.decoder.reset();
        Ok(None)
    }
}

impl Encoder<Bytes> for SerialCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_frame(&item, dst)
    }
}

impl Encoder<Frame> for SerialCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_frame(&item.payload, dst)
    }
}
