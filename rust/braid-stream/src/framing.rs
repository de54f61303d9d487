//! Length-prefixed framing over async byte streams.
//!
//! Every frame is a `u32` little-endian body length followed by the body.
//! The reader grows a buffer until a whole frame is available, so callers
//! always see complete frames; a stream that ends between frames is a clean
//! EOF, one that ends inside a frame is an error.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use braid::WireError;

/// Frame header: body length only.
pub const HEADER_SIZE: usize = 4;

/// Default maximum body size accepted by a reader: 16 MiB.
pub const DEFAULT_MAX_FRAME: usize = 16 * 1024 * 1024;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Transport tuning for one side of a connection.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Largest frame body the decoder will accept.
    pub max_frame: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_frame: DEFAULT_MAX_FRAME,
        }
    }
}

/// Writes length-prefixed frames.
pub(crate) struct FrameWriter<W> {
    io: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub(crate) fn new(io: W) -> Self {
        Self { io }
    }

    pub(crate) async fn write_frame(&mut self, body: &[u8]) -> Result<(), WireError> {
        if body.len() > u32::MAX as usize {
            return Err(WireError::Protocol(format!(
                "frame of {} bytes exceeds the wire limit",
                body.len()
            )));
        }
        let mut frame = BytesMut::with_capacity(HEADER_SIZE + body.len());
        frame.put_u32_le(body.len() as u32);
        frame.put_slice(body);
        self.io.write_all(&frame).await?;
        self.io.flush().await?;
        Ok(())
    }

    /// Close the underlying stream so the peer's reads unblock.
    pub(crate) async fn shutdown(&mut self) {
        let _ = self.io.shutdown().await;
    }
}

/// Reads length-prefixed frames.
pub(crate) struct FrameReader<R> {
    io: R,
    buf: BytesMut,
    max_frame: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub(crate) fn new(io: R, max_frame: usize) -> Self {
        Self {
            io,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            max_frame,
        }
    }

    /// Read the next complete frame body. [`WireError::Eof`] at a frame
    /// boundary, an IO error mid-frame.
    pub(crate) async fn read_frame(&mut self) -> Result<Bytes, WireError> {
        loop {
            if self.buf.len() >= HEADER_SIZE {
                let mut header = [0u8; HEADER_SIZE];
                header.copy_from_slice(&self.buf[..HEADER_SIZE]);
                let len = u32::from_le_bytes(header) as usize;
                if len > self.max_frame {
                    return Err(WireError::Protocol(format!(
                        "frame of {len} bytes exceeds the {} byte limit",
                        self.max_frame
                    )));
                }
                if self.buf.len() >= HEADER_SIZE + len {
                    self.buf.advance(HEADER_SIZE);
                    return Ok(self.buf.split_to(len).freeze());
                }
            }

            let read = self.io.read_buf(&mut self.buf).await?;
            if read == 0 {
                if self.buf.is_empty() {
                    return Err(WireError::Eof);
                }
                return Err(WireError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "stream ended inside a frame",
                )));
            }
        }
    }
}
