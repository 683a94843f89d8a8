use std::ops::Range;
use std::time::Duration;

use chunklink_transport::{Link, ReadinessGate};
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::codec::{encode_header, Flags, FrameHeader};
use crate::config::LinkConfig;
use crate::error::{ChunkError, Result, TransferStage};

/// One chunk of a partitioned frame: its id, byte range and flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedChunk {
    pub chunk_id: u16,
    pub range: Range<usize>,
    pub flags: Flags,
}

/// Iterator partitioning a frame of `len` bytes into chunks of at most
/// `chunk_max` bytes. An empty frame yields one empty START|END chunk.
#[derive(Debug, Clone)]
pub struct ChunkPlan {
    len: usize,
    chunk_max: usize,
    offset: usize,
    chunk_id: u16,
    done: bool,
}

/// Partition a frame of `len` bytes.
///
/// The caller must keep `len` within `chunk_max * 65536`; beyond that the
/// chunk ids would wrap.
pub fn plan_chunks(len: usize, chunk_max: usize) -> ChunkPlan {
    ChunkPlan {
        len,
        chunk_max: chunk_max.max(1),
        offset: 0,
        chunk_id: 0,
        done: false,
    }
}

impl Iterator for ChunkPlan {
    type Item = PlannedChunk;

    fn next(&mut self) -> Option<PlannedChunk> {
        if self.done {
            return None;
        }

        let start = self.offset;
        let end = start.saturating_add(self.chunk_max).min(self.len);
        let is_last = end >= self.len;
        let planned = PlannedChunk {
            chunk_id: self.chunk_id,
            range: start..end,
            flags: Flags::for_position(self.chunk_id, is_last),
        };

        if is_last {
            self.done = true;
        } else {
            self.offset = end;
            self.chunk_id = self.chunk_id.wrapping_add(1);
        }
        Some(planned)
    }
}

/// Outcome of a completely transmitted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameReport {
    pub frame_id: u32,
    pub bytes: usize,
    pub chunks: u32,
}

/// Sends frames as readiness-gated header/payload transfer pairs.
///
/// One frame is in flight at a time. A readiness timeout abandons the rest of
/// the current frame; the next call to [`send_frame`](Self::send_frame) starts
/// fresh with the next frame id.
pub struct ChunkTransmitter<L, G> {
    link: L,
    gate: G,
    config: LinkConfig,
    next_frame_id: u32,
}

impl<L: Link, G: ReadinessGate> ChunkTransmitter<L, G> {
    /// Create a transmitter. Fails if `config` does not validate.
    pub fn new(link: L, gate: G, config: LinkConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            link,
            gate,
            config,
            next_frame_id: 0,
        })
    }

    /// Start numbering frames at `frame_id` instead of zero.
    pub fn with_first_frame_id(mut self, frame_id: u32) -> Self {
        self.next_frame_id = frame_id;
        self
    }

    /// Id the next frame will carry.
    pub fn next_frame_id(&self) -> u32 {
        self.next_frame_id
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Split `frame` into chunks and transmit them in order.
    ///
    /// Every attempt consumes a frame id, including attempts abandoned by a
    /// readiness timeout or a link error. Frames too large for the chunk id
    /// space are rejected up front and consume nothing.
    pub fn send_frame(&mut self, frame: &[u8]) -> Result<FrameReport> {
        let max = self.config.max_frame_len();
        if frame.len() > max {
            return Err(ChunkError::FrameTooLarge {
                size: frame.len(),
                max,
            });
        }

        let frame_id = self.next_frame_id;
        self.next_frame_id = self.next_frame_id.wrapping_add(1);

        let mut chunks = 0u32;
        for planned in plan_chunks(frame.len(), self.config.chunk_max) {
            let payload = &frame[planned.range.clone()];
            let header = FrameHeader::new(
                frame_id,
                planned.chunk_id,
                planned.flags,
                payload.len() as u16,
            );

            self.gated_transfer(&header, TransferStage::Header, &encode_header(&header))?;
            self.gated_transfer(&header, TransferStage::Payload, payload)?;

            trace!(
                frame_id,
                chunk_id = planned.chunk_id,
                flags = %planned.flags,
                len = payload.len(),
                "chunk sent"
            );
            chunks += 1;
        }

        debug!(frame_id, bytes = frame.len(), chunks, "sent frame");
        Ok(FrameReport {
            frame_id,
            bytes: frame.len(),
            chunks,
        })
    }

    /// Sleep for the configured inter-frame interval.
    pub fn pace(&self) {
        if !self.config.frame_interval.is_zero() {
            std::thread::sleep(self.config.frame_interval);
        }
    }

    fn gated_transfer(
        &mut self,
        header: &FrameHeader,
        stage: TransferStage,
        bytes: &[u8],
    ) -> Result<()> {
        let timeout = self.config.ready_timeout;
        if !self.gate.wait_ready(timeout) {
            warn!(
                frame_id = header.frame_id,
                chunk_id = header.chunk_id,
                %stage,
                ready = self.gate.is_ready(),
                "receiver not ready; abandoning frame"
            );
            return Err(ChunkError::ReadyTimeout {
                frame_id: header.frame_id,
                chunk_id: header.chunk_id,
                stage,
                waited: timeout,
            });
        }

        self.link.transfer(bytes).map_err(|err| {
            warn!(
                frame_id = header.frame_id,
                chunk_id = header.chunk_id,
                %stage,
                error = %err,
                "transfer failed; abandoning frame"
            );
            ChunkError::Transport(err)
        })
    }

    /// Borrow the link.
    pub fn link(&self) -> &L {
        &self.link
    }

    /// Mutably borrow the gate.
    pub fn gate_mut(&mut self) -> &mut G {
        &mut self.gate
    }

    /// Consume the transmitter and return its link and gate.
    pub fn into_parts(self) -> (L, G) {
        (self.link, self.gate)
    }
}

impl<L, G> std::fmt::Debug for ChunkTransmitter<L, G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkTransmitter")
            .field("next_frame_id", &self.next_frame_id)
            .field("chunk_max", &self.config.chunk_max)
            .finish()
    }
}

/// Upper bound on how long one gated transfer can block.
pub fn worst_case_wait(config: &LinkConfig) -> Duration {
    config.ready_timeout + config.poll_interval
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use bytes::{Bytes, BytesMut};
    use chunklink_transport::{AlwaysReady, PollingGate, ReadyFlag, TransportError};

    use super::*;
    use crate::codec::{decode_header, HEADER_SIZE};
    use crate::reassembler::{Delivery, Reassembler};

    const C: usize = 8;

    #[derive(Default)]
    struct RecordingLink {
        transfers: Vec<Vec<u8>>,
    }

    impl Link for RecordingLink {
        fn transfer(&mut self, bytes: &[u8]) -> chunklink_transport::Result<()> {
            self.transfers.push(bytes.to_vec());
            Ok(())
        }
    }

    /// Ready for a fixed number of waits, then never again.
    struct ReadyFor(usize);

    impl ReadinessGate for ReadyFor {
        fn wait_ready(&mut self, _timeout: Duration) -> bool {
            if self.0 == 0 {
                return false;
            }
            self.0 -= 1;
            true
        }

        fn is_ready(&self) -> bool {
            self.0 > 0
        }
    }

    struct FailingLink;

    impl Link for FailingLink {
        fn transfer(&mut self, _bytes: &[u8]) -> chunklink_transport::Result<()> {
            Err(TransportError::Closed)
        }
    }

    fn config() -> LinkConfig {
        LinkConfig {
            chunk_max: C,
            ready_timeout: Duration::from_millis(20),
            frame_interval: Duration::ZERO,
            ..LinkConfig::default()
        }
    }

    fn transmitter() -> ChunkTransmitter<RecordingLink, AlwaysReady> {
        ChunkTransmitter::new(RecordingLink::default(), AlwaysReady, config()).unwrap()
    }

    fn headers(link: &RecordingLink) -> Vec<FrameHeader> {
        link.transfers
            .chunks(2)
            .map(|pair| decode_header(&pair[0]).unwrap())
            .collect()
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + 3) as u8).collect()
    }

    #[test]
    fn plan_covers_boundary_lengths() {
        let count = |len| plan_chunks(len, C).count();
        assert_eq!(count(0), 1);
        assert_eq!(count(1), 1);
        assert_eq!(count(C), 1);
        assert_eq!(count(C + 1), 2);
        assert_eq!(count(2 * C), 2);
        assert_eq!(count(2 * C + 1), 3);

        let last = plan_chunks(2 * C + 1, C).last().unwrap();
        assert_eq!(last.range, 2 * C..2 * C + 1);
        assert_eq!(last.chunk_id, 2);
    }

    #[test]
    fn empty_frame_is_one_empty_start_end_chunk() {
        let mut tx = transmitter();
        let report = tx.send_frame(&[]).unwrap();

        assert_eq!(report.chunks, 1);
        let link = tx.link();
        assert_eq!(link.transfers.len(), 2);
        let header = decode_header(&link.transfers[0]).unwrap();
        assert_eq!(header.flags, Flags::START | Flags::END);
        assert_eq!(header.payload_len, 0);
        assert!(link.transfers[1].is_empty());
    }

    #[test]
    fn single_chunk_frames_carry_start_and_end() {
        for len in [1, C] {
            let mut tx = transmitter();
            tx.send_frame(&pattern(len)).unwrap();
            let headers = headers(tx.link());
            assert_eq!(headers.len(), 1);
            assert_eq!(headers[0].flags, Flags::START | Flags::END);
            assert_eq!(headers[0].payload_len as usize, len);
        }
    }

    #[test]
    fn multi_chunk_flags_mark_only_first_and_last() {
        let mut tx = transmitter();
        tx.send_frame(&pattern(3 * C + 2)).unwrap();
        let headers = headers(tx.link());

        assert_eq!(headers.len(), 4);
        assert_eq!(headers[0].flags, Flags::START);
        assert_eq!(headers[1].flags, Flags::NONE);
        assert_eq!(headers[2].flags, Flags::NONE);
        assert_eq!(headers[3].flags, Flags::END);
        assert_eq!(
            headers.iter().map(|h| h.chunk_id).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
        assert_eq!(headers[3].payload_len, 2);
    }

    #[test]
    fn header_transfer_precedes_its_payload() {
        let mut tx = transmitter();
        let frame = pattern(C + 3);
        tx.send_frame(&frame).unwrap();

        let transfers = &tx.link().transfers;
        assert_eq!(transfers.len(), 4);
        assert_eq!(transfers[0].len(), HEADER_SIZE);
        assert_eq!(transfers[1], frame[..C].to_vec());
        assert_eq!(transfers[2].len(), HEADER_SIZE);
        assert_eq!(transfers[3], frame[C..].to_vec());
    }

    #[test]
    fn frame_ids_increase_and_wrap() {
        let mut tx = transmitter().with_first_frame_id(u32::MAX);
        assert_eq!(tx.send_frame(b"a").unwrap().frame_id, u32::MAX);
        assert_eq!(tx.send_frame(b"b").unwrap().frame_id, 0);
        assert_eq!(tx.next_frame_id(), 1);
    }

    #[test]
    fn roundtrip_through_reassembler_at_boundary_lengths() {
        for len in [0, 1, C, C + 1, 2 * C, 2 * C + 1] {
            let mut tx = transmitter();
            let frame = pattern(len);
            tx.send_frame(&frame).unwrap();

            let mut rx = Reassembler::new(Default::default(), Duration::ZERO);
            let mut emitted = Vec::new();
            for pair in tx.link().transfers.chunks(2) {
                let mut message = BytesMut::new();
                message.extend_from_slice(&pair[0]);
                message.extend_from_slice(&pair[1]);
                if let Delivery::Complete(done) = rx.accept(message.freeze()) {
                    emitted.push(done);
                }
            }

            assert_eq!(emitted.len(), 1, "len {len}");
            assert_eq!(emitted[0].payload, Bytes::from(frame), "len {len}");
        }
    }

    #[test]
    fn timeout_before_header_sends_nothing() {
        let mut tx = ChunkTransmitter::new(RecordingLink::default(), ReadyFor(0), config()).unwrap();
        let err = tx.send_frame(&pattern(3 * C)).unwrap_err();

        assert!(matches!(
            err,
            ChunkError::ReadyTimeout {
                frame_id: 0,
                chunk_id: 0,
                stage: TransferStage::Header,
                ..
            }
        ));
        assert!(tx.link().transfers.is_empty());
        assert_eq!(tx.next_frame_id(), 1);
    }

    #[test]
    fn timeout_mid_frame_abandons_remaining_chunks() {
        // Header and payload of chunk 0, then header of chunk 1; payload of chunk 1 times out.
        let mut tx = ChunkTransmitter::new(RecordingLink::default(), ReadyFor(3), config()).unwrap();
        let err = tx.send_frame(&pattern(3 * C)).unwrap_err();

        assert!(matches!(
            err,
            ChunkError::ReadyTimeout {
                chunk_id: 1,
                stage: TransferStage::Payload,
                ..
            }
        ));
        assert_eq!(tx.link().transfers.len(), 3);

        // The next frame starts fresh.
        tx.gate_mut().0 = 2;
        let report = tx.send_frame(b"ok").unwrap();
        assert_eq!(report.frame_id, 1);
        let last = decode_header(&tx.link().transfers[3]).unwrap();
        assert_eq!((last.frame_id, last.chunk_id), (1, 0));
        assert!(last.is_start());
    }

    #[test]
    fn never_ready_gate_returns_within_bound() {
        let cfg = config();
        let gate = PollingGate::new(ReadyFlag::new(false), cfg.poll_interval);
        let mut tx = ChunkTransmitter::new(RecordingLink::default(), gate, cfg.clone()).unwrap();

        let start = Instant::now();
        assert!(tx.send_frame(&pattern(4 * C)).is_err());
        let elapsed = start.elapsed();

        assert!(elapsed >= cfg.ready_timeout);
        assert!(elapsed < worst_case_wait(&cfg) + Duration::from_millis(200));
    }

    #[test]
    fn link_failure_loses_only_the_current_frame() {
        let mut tx = ChunkTransmitter::new(FailingLink, AlwaysReady, config()).unwrap();
        let err = tx.send_frame(b"lost").unwrap_err();
        assert!(matches!(
            err,
            ChunkError::Transport(TransportError::Closed)
        ));
        assert_eq!(tx.next_frame_id(), 1);
    }

    #[test]
    fn oversized_frame_rejected_without_consuming_id() {
        let cfg = LinkConfig {
            chunk_max: 1,
            ..config()
        };
        let mut tx = ChunkTransmitter::new(RecordingLink::default(), AlwaysReady, cfg).unwrap();

        let err = tx.send_frame(&vec![0u8; 65_537]).unwrap_err();
        assert!(matches!(err, ChunkError::FrameTooLarge { size: 65_537, max: 65_536 }));
        assert_eq!(tx.next_frame_id(), 0);
        assert!(tx.link().transfers.is_empty());

        // Exactly at the limit the last chunk id is 65535.
        tx.send_frame(&vec![0u8; 65_536]).unwrap();
        let last = decode_header(&tx.link().transfers[tx.link().transfers.len() - 2]).unwrap();
        assert_eq!(last.chunk_id, u16::MAX);
        assert!(last.is_end());
    }

    #[test]
    fn invalid_config_rejected_at_construction() {
        let cfg = LinkConfig {
            chunk_max: 0,
            ..config()
        };
        let err = ChunkTransmitter::new(RecordingLink::default(), AlwaysReady, cfg).unwrap_err();
        assert!(matches!(err, ChunkError::Config(_)));
    }
}
