use std::io::{ErrorKind, Write};
use std::time::Duration;

use crate::error::{Result, TransportError};
use crate::traits::Link;

/// Pause before retrying a write the stream reported as `WouldBlock`.
pub const WOULD_BLOCK_BACKOFF: Duration = Duration::from_millis(1);

/// A [`Link`] over any byte stream (file, pipe, stdout, serial device node).
///
/// Each transfer is written contiguously and flushed before the call returns.
/// Transfer boundaries are not preserved on the stream itself; the reading side
/// recovers them from the chunk headers.
pub struct StreamLink<W> {
    inner: W,
    transfers: u64,
}

impl<W: Write> StreamLink<W> {
    /// Wrap a writable stream.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            transfers: 0,
        }
    }

    /// Number of completed transfers.
    pub fn transfers(&self) -> u64 {
        self.transfers
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Consume the link and return the inner stream.
    pub fn into_inner(self) -> W {
        self.inner
    }

    fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(WOULD_BLOCK_BACKOFF)
                }
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
    }
}

impl<W: Write> Link for StreamLink<W> {
    fn transfer(&mut self, bytes: &[u8]) -> Result<()> {
        let mut offset = 0usize;
        while offset < bytes.len() {
            match self.inner.write(&bytes[offset..]) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(WOULD_BLOCK_BACKOFF)
                }
                Err(err) => return Err(TransportError::Io(err)),
            }
        }

        self.flush()?;
        self.transfers += 1;
        Ok(())
    }
}

impl<W> std::fmt::Debug for StreamLink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamLink")
            .field("transfers", &self.transfers)
            .finish()
    }
}
