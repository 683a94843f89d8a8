use std::io::{ErrorKind, Read};

use bytes::{Bytes, BytesMut};
use chunklink_transport::{ChunkSource, TransportError};
use tracing::debug;

use crate::codec::{decode_header, HEADER_SIZE};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Recovers chunk messages from a byte stream (file, pipe, serial device).
///
/// The stream carries header and payload transfers back to back; the reader
/// uses each header's `payload_len` to find where the chunk ends and yields
/// header+payload as one message, the same shape a datagram link delivers.
pub struct ChunkReader<R> {
    inner: R,
    buf: BytesMut,
}

impl<R: Read> ChunkReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> R {
        self.inner
    }

    fn split_message(&mut self) -> Option<Bytes> {
        let header = decode_header(&self.buf).ok()?;
        let total = HEADER_SIZE + header.payload_len as usize;
        if self.buf.len() < total {
            return None;
        }
        Some(self.buf.split_to(total).freeze())
    }
}

impl<R: Read> ChunkSource for ChunkReader<R> {
    /// Returns `Ok(None)` when the stream's read timeout expires and
    /// `Err(TransportError::Closed)` at end of stream. Bytes of a chunk cut
    /// short by end of stream are discarded.
    fn recv_message(&mut self) -> chunklink_transport::Result<Option<Bytes>> {
        loop {
            if let Some(message) = self.split_message() {
                return Ok(Some(message));
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err)
                    if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut =>
                {
                    return Ok(None)
                }
                Err(err) => return Err(TransportError::Io(err)),
            };

            if read == 0 {
                if !self.buf.is_empty() {
                    debug!(bytes = self.buf.len(), "stream ended mid-chunk");
                    self.buf.clear();
                }
                return Err(TransportError::Closed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }
}

impl<R> std::fmt::Debug for ChunkReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkReader")
            .field("buffered", &self.buf.len())
            .finish()
    }
}
