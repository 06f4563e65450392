use std::io::ErrorKind;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::codec::{Frame, MAX_PAYLOAD};
use crate::decoder::{DecodeState, FrameDecoder};
use crate::error::{FrameError, Result};

/// Drives a [`FrameDecoder`] over an async byte source.
///
/// The reader owns the link so that callers needing link-specific controls
/// (DTR/RTS on a serial port) reach it through [`get_mut`](FrameReader::get_mut).
pub struct FrameReader<T> {
    inner: T,
    decoder: FrameDecoder,
    chunk: Box<[u8; MAX_PAYLOAD]>,
}

impl<T: AsyncRead + Unpin> FrameReader<T> {
    /// Create a new frame reader starting in header search.
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            decoder: FrameDecoder::new(),
            chunk: Box::new([0u8; MAX_PAYLOAD]),
        }
    }

    /// Advance the decoder by exactly one state transition.
    ///
    /// Performs at most one read on the link, sized to what the current
    /// state still needs. A read that returns fewer bytes counts as a short
    /// read and sends the decoder back to header search. Returns the frame
    /// when this step completed one.
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when the link reports end
    /// of stream; the decoder is back in header search at that point.
    pub async fn listen_step(&mut self) -> Result<Option<Frame>> {
        let missing = self.decoder.missing();
        if missing == 0 {
            return Ok(self.decoder.step(&[]));
        }

        let read = loop {
            match self.inner.read(&mut self.chunk[..missing]).await {
                Ok(n) => break n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        };

        let frame = self.decoder.step(&self.chunk[..read]);
        if read == 0 {
            return Err(FrameError::ConnectionClosed);
        }
        Ok(frame)
    }

    /// Step until the next complete frame.
    pub async fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.listen_step().await? {
                return Ok(frame);
            }
        }
    }

    /// Current decoder position.
    pub fn state(&self) -> DecodeState {
        self.decoder.state()
    }

    /// Borrow the decode cursor.
    pub fn decoder(&self) -> &FrameDecoder {
        &self.decoder
    }

    /// Discard any partially decoded frame.
    pub fn reset(&mut self) {
        self.decoder.reset();
    }

    /// Borrow the underlying link.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying link.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner link.
    pub fn into_inner(self) -> T {
        self.inner
    }
}
