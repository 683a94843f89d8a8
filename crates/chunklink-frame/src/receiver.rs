use std::time::Instant;

use chunklink_transport::ChunkSource;
use tracing::{debug, warn};

use crate::config::LinkConfig;
use crate::error::Result;
use crate::reassembler::{AssembledFrame, Delivery, Reassembler, ReassemblerStats};

/// Destination for completed frames.
///
/// A failing consumer loses that frame only; the receiver keeps going.
pub trait FrameConsumer {
    fn consume(&mut self, frame: &AssembledFrame) -> std::io::Result<()>;
}

impl<F: FnMut(&AssembledFrame) -> std::io::Result<()>> FrameConsumer for F {
    fn consume(&mut self, frame: &AssembledFrame) -> std::io::Result<()> {
        self(frame)
    }
}

/// Drives a [`Reassembler`] from a [`ChunkSource`] and hands finished frames
/// to a [`FrameConsumer`].
pub struct ChunkReceiver<S, C> {
    source: S,
    consumer: C,
    reassembler: Reassembler,
}

impl<S: ChunkSource, C: FrameConsumer> ChunkReceiver<S, C> {
    pub fn new(source: S, consumer: C, config: &LinkConfig) -> Self {
        Self {
            source,
            consumer,
            reassembler: Reassembler::from_config(config),
        }
    }

    /// Receive and process one message.
    ///
    /// Returns `Ok(None)` if the source timed out without a message; idle
    /// frames are swept on every call either way. Source errors (including
    /// end of stream) are returned; nothing the far side sends is an error.
    pub fn poll(&mut self) -> Result<Option<Delivery>> {
        let message = self.source.recv_message();
        self.reassembler.sweep(Instant::now());

        let Some(message) = message? else {
            return Ok(None);
        };

        let delivery = self.reassembler.accept(message);
        match &delivery {
            Delivery::Complete(frame) => {
                if let Err(err) = self.consumer.consume(frame) {
                    warn!(frame_id = frame.frame_id, error = %err, "frame consumer failed");
                }
            }
            Delivery::Dropped(reason) => debug!(%reason, "dropped chunk"),
            Delivery::Pending => {}
        }
        Ok(Some(delivery))
    }

    /// Poll until one frame completes.
    pub fn next_frame(&mut self) -> Result<AssembledFrame> {
        loop {
            if let Some(Delivery::Complete(frame)) = self.poll()? {
                return Ok(frame);
            }
        }
    }

    pub fn stats(&self) -> &ReassemblerStats {
        self.reassembler.stats()
    }

    pub fn reassembler(&self) -> &Reassembler {
        &self.reassembler
    }

    /// Borrow the chunk source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Borrow the consumer.
    pub fn consumer(&self) -> &C {
        &self.consumer
    }

    /// Consume the receiver and return its source and consumer.
    pub fn into_parts(self) -> (S, C) {
        (self.source, self.consumer)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::time::Duration;

    use bytes::{BufMut, Bytes, BytesMut};
    use chunklink_transport::TransportError;

    use super::*;
    use crate::codec::{encode_header, Flags, FrameHeader};
    use crate::error::ChunkError;
    use crate::reassembler::DropReason;

    /// Yields queued messages, `None` for queued timeouts, then reports closed.
    struct Scripted(VecDeque<Option<Bytes>>);

    impl ChunkSource for Scripted {
        fn recv_message(&mut self) -> chunklink_transport::Result<Option<Bytes>> {
            self.0.pop_front().ok_or(TransportError::Closed)
        }
    }

    fn message(frame_id: u32, chunk_id: u16, flags: Flags, payload: &[u8]) -> Option<Bytes> {
        let mut wire = BytesMut::new();
        wire.put_slice(&encode_header(&FrameHeader::new(
            frame_id,
            chunk_id,
            flags,
            payload.len() as u16,
        )));
        wire.put_slice(payload);
        Some(wire.freeze())
    }

    fn collecting() -> impl FnMut(&AssembledFrame) -> std::io::Result<()> {
        let mut seen = Vec::new();
        move |frame: &AssembledFrame| {
            seen.push(frame.frame_id);
            Ok(())
        }
    }

    #[test]
    fn delivers_completed_frames_to_consumer() {
        let source = Scripted(VecDeque::from(vec![
            message(1, 0, Flags::START, b"he"),
            None,
            message(1, 1, Flags::END, b"llo"),
        ]));
        let mut delivered = Vec::new();
        let mut rx = ChunkReceiver::new(
            source,
            |frame: &AssembledFrame| -> std::io::Result<()> {
                delivered.push(frame.payload.clone());
                Ok(())
            },
            &LinkConfig::default(),
        );

        assert_eq!(rx.poll().unwrap(), Some(Delivery::Pending));
        assert_eq!(rx.poll().unwrap(), None);
        let frame = rx.next_frame().unwrap();
        assert_eq!(frame.payload.as_ref(), b"hello");

        let err = rx.poll().unwrap_err();
        assert!(matches!(err, ChunkError::Transport(TransportError::Closed)));
        drop(rx);
        assert_eq!(delivered, vec![Bytes::from_static(b"hello")]);
    }

    #[test]
    fn consumer_failure_is_not_fatal() {
        let source = Scripted(VecDeque::from(vec![
            message(1, 0, Flags::START | Flags::END, b"a"),
            message(2, 0, Flags::START | Flags::END, b"b"),
        ]));
        let mut calls = 0;
        let mut rx = ChunkReceiver::new(
            source,
            |_frame: &AssembledFrame| -> std::io::Result<()> {
                calls += 1;
                Err(std::io::Error::other("disk full"))
            },
            &LinkConfig::default(),
        );

        assert!(matches!(rx.poll().unwrap(), Some(Delivery::Complete(_))));
        assert!(matches!(rx.poll().unwrap(), Some(Delivery::Complete(_))));
        drop(rx);
        assert_eq!(calls, 2);
    }

    #[test]
    fn drops_are_reported_not_raised() {
        let source = Scripted(VecDeque::from(vec![message(7, 3, Flags::NONE, b"x")]));
        let mut rx = ChunkReceiver::new(source, collecting(), &LinkConfig::default());

        assert_eq!(
            rx.poll().unwrap(),
            Some(Delivery::Dropped(DropReason::NoOpenFrame { frame_id: 7 }))
        );
        assert_eq!(rx.stats().chunks_dropped, 1);
    }

    #[test]
    fn timeouts_sweep_idle_frames() {
        let config = LinkConfig {
            idle_timeout: Duration::from_millis(10),
            ..LinkConfig::default()
        };
        let source = Scripted(VecDeque::from(vec![
            message(3, 0, Flags::START, b"partial"),
            None,
        ]));
        let mut rx = ChunkReceiver::new(source, collecting(), &config);

        rx.poll().unwrap();
        assert!(rx.reassembler().open_frame().is_some());

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(rx.poll().unwrap(), None);
        assert!(rx.reassembler().open_frame().is_none());
        assert_eq!(rx.stats().frames_evicted, 1);
    }
}
