use bytes::{BufMut, BytesMut};
use chunklink_transport::{Link, ReadyFlag};
use serde::Serialize;
use tracing::{debug, trace};

use crate::codec::{decode_header, FrameHeader, HEADER_SIZE};
use crate::error::Result;

/// What the relay did with one inbound transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// A header was stored; the next transfer is taken as its payload.
    HeaderAccepted { header: FrameHeader, expected: usize },
    /// Header and payload went downstream as one message.
    Forwarded { header: FrameHeader, len: usize },
    /// A header-stage transfer of the wrong size was discarded.
    Rejected { len: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    pub forwarded: u64,
    pub rejected: u64,
    pub clamped: u64,
}

#[derive(Debug)]
enum State {
    AwaitHeader,
    AwaitPayload {
        raw: [u8; HEADER_SIZE],
        header: FrameHeader,
        expected: usize,
    },
}

/// Bridge endpoint between a gated two-transfer link and a message link.
///
/// Pairs each header transfer with the payload transfer that follows it and
/// forwards the pair downstream as a single message. The relay drives a
/// [`ReadyFlag`]: low while a transfer is being handled, high once it can
/// take the next one.
pub struct PairingRelay<L> {
    downstream: L,
    ready: ReadyFlag,
    capacity: usize,
    state: State,
    stats: RelayStats,
}

impl<L: Link> PairingRelay<L> {
    /// `capacity` bounds how many payload bytes are taken from one transfer.
    pub fn new(downstream: L, capacity: usize) -> Self {
        Self {
            downstream,
            ready: ReadyFlag::new(true),
            capacity,
            state: State::AwaitHeader,
            stats: RelayStats::default(),
        }
    }

    /// Handle to the ready line this relay drives.
    pub fn ready_flag(&self) -> ReadyFlag {
        self.ready.clone()
    }

    /// Whether the relay is waiting for a payload transfer.
    pub fn awaiting_payload(&self) -> bool {
        matches!(self.state, State::AwaitPayload { .. })
    }

    pub fn stats(&self) -> &RelayStats {
        &self.stats
    }

    pub fn downstream(&self) -> &L {
        &self.downstream
    }

    /// Process one inbound transfer.
    ///
    /// Readiness is raised again before returning, also when forwarding
    /// fails; the failed pair is lost and the relay waits for a new header.
    pub fn on_transfer(&mut self, transfer: &[u8]) -> Result<RelayEvent> {
        self.ready.set_ready(false);
        let event = self.handle(transfer);
        self.ready.set_ready(true);
        event
    }

    fn handle(&mut self, transfer: &[u8]) -> Result<RelayEvent> {
        match std::mem::replace(&mut self.state, State::AwaitHeader) {
            State::AwaitHeader => {
                if transfer.len() != HEADER_SIZE {
                    self.stats.rejected += 1;
                    debug!(len = transfer.len(), "discarding header transfer of wrong size");
                    return Ok(RelayEvent::Rejected {
                        len: transfer.len(),
                    });
                }

                let header = decode_header(transfer)?;
                let declared = header.payload_len as usize;
                let expected = declared.min(self.capacity);
                if expected < declared {
                    self.stats.clamped += 1;
                    debug!(
                        frame_id = header.frame_id,
                        chunk_id = header.chunk_id,
                        declared,
                        capacity = self.capacity,
                        "payload length clamped"
                    );
                }

                let mut raw = [0u8; HEADER_SIZE];
                raw.copy_from_slice(transfer);
                self.state = State::AwaitPayload {
                    raw,
                    header,
                    expected,
                };
                Ok(RelayEvent::HeaderAccepted { header, expected })
            }
            State::AwaitPayload {
                raw,
                header,
                expected,
            } => {
                let len = transfer.len().min(expected);
                let mut message = BytesMut::with_capacity(HEADER_SIZE + len);
                message.put_slice(&raw);
                message.put_slice(&transfer[..len]);
                self.downstream.transfer(&message)?;

                self.stats.forwarded += 1;
                trace!(
                    frame_id = header.frame_id,
                    chunk_id = header.chunk_id,
                    len,
                    "forwarded chunk"
                );
                Ok(RelayEvent::Forwarded { header, len })
            }
        }
    }
}

impl<L> std::fmt::Debug for PairingRelay<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairingRelay")
            .field("capacity", &self.capacity)
            .field("state", &self.state)
            .field("stats", &self.stats)
            .finish()
    }
}
