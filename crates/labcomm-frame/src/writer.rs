use std::io::ErrorKind;

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::codec::{encode_frame, Frame, CRC_SIZE, MAX_PAYLOAD, PREFIX_SIZE};
use crate::error::{FrameError, Result};

/// Writes complete frames to any async byte sink.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
}

impl<T: AsyncWrite + Unpin> FrameWriter<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(PREFIX_SIZE + MAX_PAYLOAD + CRC_SIZE),
        }
    }

    /// Write a complete frame.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.send(frame.payload.as_ref()).await
    }

    /// Frame a payload and write it in full.
    pub async fn send(&mut self, payload: &[u8]) -> Result<()> {
        self.buf.clear();
        encode_frame(payload, &mut self.buf)?;
        write_all_retrying(&mut self.inner, &self.buf).await?;
        self.flush().await
    }

    /// Flush the underlying sink.
    pub async fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush().await {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying sink.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying sink.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner sink.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

/// Frame `payload` and write it to `dst` without keeping a writer around.
pub async fn write_frame<W: AsyncWrite + Unpin>(dst: &mut W, payload: &[u8]) -> Result<()> {
    let mut buf = BytesMut::with_capacity(PREFIX_SIZE + payload.len() + CRC_SIZE);
    encode_frame(payload, &mut buf)?;
    write_all_retrying(dst, &buf).await?;
    dst.flush().await?;
    Ok(())
}

async fn write_all_retrying<W: AsyncWrite + Unpin>(dst: &mut W, mut bytes: &[u8]) -> Result<()> {
    while !bytes.is_empty() {
        match dst.write(bytes).await {
            Ok(0) => return Err(FrameError::ConnectionClosed),
            Ok(n) => bytes = &bytes[n..],
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(FrameError::Io(err)),
        }
    }
    Ok(())
}
