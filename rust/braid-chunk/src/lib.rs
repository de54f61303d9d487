#![deny(unsafe_code)]

//! Byte-chunk adapters.
//!
//! Applications tunnel arbitrary byte streams (stdout, stderr, file
//! contents) through channels of element type `Vec<u8>` without framing each
//! call: a [`ChunkWriter`] buffers writes into bounded chunks, a
//! [`ChunkReader`] turns the chunks back into a byte stream, and the
//! free functions cover the common produce/consume shapes.

use braid::{Rx, Tx, TxError, channel};

/// Default chunk size: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Buffer depth of the channel behind [`chunk_writer`].
const WRITER_CHANNEL_CAP: usize = 10;

/// A writer that buffers bytes and emits them as chunks on a channel.
///
/// A chunk is emitted when appending a write would overflow the chunk size;
/// [`ChunkWriter::close`] flushes the remainder and closes the channel. A
/// single write larger than the chunk size travels as one oversized chunk.
pub struct ChunkWriter {
    tx: Tx<Vec<u8>>,
    buf: Vec<u8>,
    chunk_size: usize,
}

/// Create a channel and a writer emitting chunks of the default size on it.
pub fn chunk_writer() -> (Rx<Vec<u8>>, ChunkWriter) {
    chunk_writer_size(DEFAULT_CHUNK_SIZE)
}

/// Create a channel and a writer emitting chunks of the given size on it.
pub fn chunk_writer_size(chunk_size: usize) -> (Rx<Vec<u8>>, ChunkWriter) {
    let (tx, rx) = channel(WRITER_CHANNEL_CAP);
    (
        rx,
        ChunkWriter {
            tx,
            buf: Vec::with_capacity(chunk_size),
            chunk_size,
        },
    )
}

impl ChunkWriter {
    /// Append bytes, emitting the buffered chunk first if this write would
    /// overflow it.
    pub async fn write(&mut self, data: &[u8]) -> Result<(), TxError> {
        if !self.buf.is_empty() && self.buf.len() + data.len() > self.chunk_size {
            let chunk = std::mem::replace(&mut self.buf, Vec::with_capacity(self.chunk_size));
            self.tx.send(chunk).await?;
        }
        self.buf.extend_from_slice(data);
        Ok(())
    }

    /// Flush any buffered remainder and close the channel.
    pub async fn close(mut self) -> Result<(), TxError> {
        if !self.buf.is_empty() {
            let chunk = std::mem::take(&mut self.buf);
            self.tx.send(chunk).await?;
        }
        Ok(())
    }
}

/// Reads the bytes carried by a chunk channel.
pub struct ChunkReader {
    rx: Rx<Vec<u8>>,
    carry: Vec<u8>,
    pos: usize,
}

impl ChunkReader {
    pub fn new(rx: Rx<Vec<u8>>) -> Self {
        Self {
            rx,
            carry: Vec::new(),
            pos: 0,
        }
    }

    /// Fill `out` with the next available bytes; `0` means the channel is
    /// closed and drained.
    pub async fn read(&mut self, out: &mut [u8]) -> usize {
        if out.is_empty() {
            return 0;
        }
        while self.pos == self.carry.len() {
            match self.rx.recv().await {
                Some(chunk) => {
                    self.carry = chunk;
                    self.pos = 0;
                }
                None => return 0,
            }
        }
        let n = (self.carry.len() - self.pos).min(out.len());
        out[..n].copy_from_slice(&self.carry[self.pos..self.pos + n]);
        self.pos += n;
        n
    }
}

/// Consume and discard chunks until the channel closes.
pub async fn drain(mut rx: Rx<Vec<u8>>) {
    while rx.recv().await.is_some() {}
}

/// Accumulate every chunk in the background; the returned channel delivers
/// the single concatenated slice and then closes. Must be called from within
/// a runtime.
pub fn read_all(mut rx: Rx<Vec<u8>>) -> Rx<Vec<u8>> {
    let (tx, out) = channel(1);
    tokio::spawn(async move {
        let mut all = Vec::new();
        while let Some(chunk) = rx.recv().await {
            all.extend_from_slice(&chunk);
        }
        let _ = tx.send(all).await;
    });
    out
}

/// Split a byte slice into chunks of the default size; the last may be
/// short.
pub fn split_to_chunks(data: &[u8]) -> Vec<Vec<u8>> {
    split_to_chunks_size(data, DEFAULT_CHUNK_SIZE)
}

/// Split a byte slice into chunks of the given size; the last may be short.
pub fn split_to_chunks_size(data: &[u8], chunk_size: usize) -> Vec<Vec<u8>> {
    data.chunks(chunk_size).map(|chunk| chunk.to_vec()).collect()
}

/// Load ready-made chunks onto a fresh, already-closed channel.
pub fn send_chunks(chunks: Vec<Vec<u8>>) -> Rx<Vec<u8>> {
    let (tx, rx) = channel(chunks.len().max(1));
    for chunk in chunks {
        // The channel was sized for exactly this many chunks.
        let _ = tx.try_send(chunk);
    }
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writer_emits_on_overflow_and_close() {
        let (mut rx, mut writer) = chunk_writer_size(8);
        writer.write(b"aaaa").await.unwrap();
        writer.write(b"bbbb").await.unwrap(); // exactly full, not emitted yet
        writer.write(b"cc").await.unwrap(); // would overflow: flush first
        writer.close().await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), b"aaaabbbb");
        assert_eq!(rx.recv().await.unwrap(), b"cc");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn oversized_write_travels_whole() {
        let (mut rx, mut writer) = chunk_writer_size(4);
        writer.write(b"0123456789").await.unwrap();
        writer.close().await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), b"0123456789");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn close_without_data_just_closes() {
        let (mut rx, writer) = chunk_writer_size(4);
        writer.close().await.unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn reader_reassembles_across_chunks() {
        let rx = send_chunks(vec![b"hel".to_vec(), Vec::new(), b"lo!".to_vec()]);
        let mut reader = ChunkReader::new(rx);

        let mut out = Vec::new();
        let mut buf = [0u8; 2];
        loop {
            let n = reader.read(&mut buf).await;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, b"hello!");
    }

    #[tokio::test]
    async fn read_all_concatenates() {
        let rx = send_chunks(split_to_chunks_size(b"the quick brown fox", 4));
        let mut all = read_all(rx);
        assert_eq!(all.recv().await.unwrap(), b"the quick brown fox");
        assert!(all.recv().await.is_none());
    }

    #[tokio::test]
    async fn drain_discards_everything() {
        let rx = send_chunks(vec![vec![1; 16], vec![2; 16]]);
        drain(rx).await;
    }

    #[test]
    fn split_boundaries() {
        assert!(split_to_chunks_size(b"", 4).is_empty());
        assert_eq!(split_to_chunks_size(b"abcd", 4), vec![b"abcd".to_vec()]);
        assert_eq!(
            split_to_chunks_size(b"abcdef", 4),
            vec![b"abcd".to_vec(), b"ef".to_vec()]
        );
    }
}
