use bytes::Bytes;

use crate::error::Result;

/// The sending half of a link.
///
/// One call to [`Link::transfer`] is one atomic transfer on the wire: a single
/// chip-select window on a synchronous serial bus, a single UDP datagram, or a
/// single contiguous write on a byte stream. Implementations must not split or
/// merge transfers.
pub trait Link {
    /// Move `bytes` across the link as one transfer (blocking).
    fn transfer(&mut self, bytes: &[u8]) -> Result<()>;
}

impl<L: Link + ?Sized> Link for &mut L {
    fn transfer(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).transfer(bytes)
    }
}

impl<L: Link + ?Sized> Link for Box<L> {
    fn transfer(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).transfer(bytes)
    }
}

/// The receiving half of a link, yielding discrete messages.
///
/// Message boundaries are the source's business: a datagram socket returns one
/// datagram per call, a stream source recovers boundaries from the data.
pub trait ChunkSource {
    /// Receive the next message.
    ///
    /// Returns `Ok(None)` when nothing arrived within the source's read timeout,
    /// and `Err(TransportError::Closed)` once the far side is gone for good.
    fn recv_message(&mut self) -> Result<Option<Bytes>>;
}

impl<S: ChunkSource + ?Sized> ChunkSource for &mut S {
    fn recv_message(&mut self) -> Result<Option<Bytes>> {
        (**self).recv_message()
    }
}

impl<S: ChunkSource + ?Sized> ChunkSource for Box<S> {
    fn recv_message(&mut self) -> Result<Option<Bytes>> {
        (**self).recv_message()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recording(Vec<Vec<u8>>);

    impl Link for Recording {
        fn transfer(&mut self, bytes: &[u8]) -> Result<()> {
            self.0.push(bytes.to_vec());
            Ok(())
        }
    }

    fn send_twice<L: Link>(mut link: L) {
        link.transfer(b"hdr").unwrap();
        link.transfer(b"payload").unwrap();
    }

    #[test]
    fn link_by_mutable_reference_keeps_transfer_boundaries() {
        let mut link = Recording(Vec::new());
        send_twice(&mut link);
        assert_eq!(link.0, vec![b"hdr".to_vec(), b"payload".to_vec()]);
    }

    #[test]
    fn boxed_link_dispatches() {
        let mut boxed: Box<dyn Link> = Box::new(Recording(Vec::new()));
        boxed.transfer(b"x").unwrap();
    }
}
