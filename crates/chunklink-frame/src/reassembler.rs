//! Single-buffer frame reassembly.
//!
//! At most one frame is open at a time. A START chunk always opens a fresh
//! buffer, discarding whatever was open; continuation chunks that do not belong
//! to the open frame are dropped without touching it.

use std::fmt;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::codec::{Chunk, FrameHeader};
use crate::config::LinkConfig;
use crate::error::ChunkError;

/// How continuation chunks are checked against the open frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SequencePolicy {
    /// chunk_id must be exactly one past the previous chunk; a gap or a
    /// duplicate discards the open frame.
    #[default]
    Strict,
    /// Append in arrival order. Only correct if the link delivers a frame's
    /// chunks in order and at most once.
    TrustArrivalOrder,
}

/// A completely reassembled frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledFrame {
    pub frame_id: u32,
    pub chunks: u32,
    pub payload: Bytes,
}

/// Why a chunk was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Shorter than a header.
    Malformed,
    /// Payload shorter than the header declares.
    ShortPayload,
    /// Continuation chunk with no frame open.
    NoOpenFrame { frame_id: u32 },
    /// Continuation chunk for a frame other than the open one.
    FrameMismatch { open: u32, got: u32 },
    /// Gap or duplicate within the open frame; the open frame was discarded.
    OutOfSequence {
        frame_id: u32,
        expected: u16,
        got: u16,
    },
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::Malformed => f.write_str("malformed header"),
            DropReason::ShortPayload => f.write_str("short payload"),
            DropReason::NoOpenFrame { frame_id } => {
                write!(f, "frame {frame_id} has no START")
            }
            DropReason::FrameMismatch { open, got } => {
                write!(f, "chunk for frame {got} while frame {open} is open")
            }
            DropReason::OutOfSequence {
                frame_id,
                expected,
                got,
            } => write!(
                f,
                "frame {frame_id} expected chunk {expected}, got {got}"
            ),
        }
    }
}

/// Result of feeding one message to the reassembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// The chunk carried END and completed the open frame.
    Complete(AssembledFrame),
    /// The chunk was appended; the frame is still open.
    Pending,
    /// The chunk was not used.
    Dropped(DropReason),
}

/// Counters kept across the reassembler's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReassemblerStats {
    pub chunks_accepted: u64,
    pub chunks_dropped: u64,
    pub frames_completed: u64,
    /// Open frames discarded by a new START.
    pub frames_superseded: u64,
    /// Open frames discarded by the idle sweep.
    pub frames_evicted: u64,
    /// Open frames discarded because of a chunk_id gap or duplicate.
    pub frames_out_of_sequence: u64,
}

#[derive(Debug)]
struct OpenFrame {
    frame_id: u32,
    buf: BytesMut,
    chunks: u32,
    next_chunk_id: u16,
    last_seen: Instant,
}

/// Owned reassembly context.
#[derive(Debug)]
pub struct Reassembler {
    open: Option<OpenFrame>,
    policy: SequencePolicy,
    idle_timeout: Duration,
    stats: ReassemblerStats,
}

impl Reassembler {
    /// Create a reassembler. A zero `idle_timeout` disables eviction.
    pub fn new(policy: SequencePolicy, idle_timeout: Duration) -> Self {
        Self {
            open: None,
            policy,
            idle_timeout,
            stats: ReassemblerStats::default(),
        }
    }

    pub fn from_config(config: &LinkConfig) -> Self {
        Self::new(config.sequence, config.idle_timeout)
    }

    /// Feed one received message (header followed by payload).
    pub fn accept(&mut self, message: Bytes) -> Delivery {
        self.accept_at(message, Instant::now())
    }

    /// Feed one message, using `now` as its arrival time.
    pub fn accept_at(&mut self, message: Bytes, now: Instant) -> Delivery {
        match Chunk::parse(message) {
            Ok(chunk) => self.accept_chunk_at(chunk, now),
            Err(ChunkError::MalformedHeader { .. }) => self.dropped(DropReason::Malformed),
            Err(_) => self.dropped(DropReason::ShortPayload),
        }
    }

    /// Feed an already-parsed chunk.
    pub fn accept_chunk_at(&mut self, chunk: Chunk, now: Instant) -> Delivery {
        let header = chunk.header;

        if header.is_start() {
            if let Some(stale) = self.open.take() {
                self.stats.frames_superseded += 1;
                debug!(
                    discarded = stale.frame_id,
                    bytes = stale.buf.len(),
                    frame_id = header.frame_id,
                    "new START before END; discarding open frame"
                );
            }
            self.open = Some(OpenFrame {
                frame_id: header.frame_id,
                buf: BytesMut::new(),
                chunks: 0,
                next_chunk_id: header.chunk_id,
                last_seen: now,
            });
        } else if let Some(reason) = self.check_continuation(&header) {
            return self.dropped(reason);
        }

        let Some(open) = self.open.as_mut() else {
            return self.dropped(DropReason::NoOpenFrame {
                frame_id: header.frame_id,
            });
        };

        open.buf.extend_from_slice(&chunk.payload);
        open.chunks += 1;
        open.next_chunk_id = header.chunk_id.wrapping_add(1);
        open.last_seen = now;
        self.stats.chunks_accepted += 1;
        trace!(
            frame_id = header.frame_id,
            chunk_id = header.chunk_id,
            flags = %header.flags,
            len = chunk.payload.len(),
            "chunk accepted"
        );

        if !header.is_end() {
            return Delivery::Pending;
        }

        match self.open.take() {
            Some(done) => {
                self.stats.frames_completed += 1;
                debug!(
                    frame_id = done.frame_id,
                    bytes = done.buf.len(),
                    chunks = done.chunks,
                    "frame complete"
                );
                Delivery::Complete(AssembledFrame {
                    frame_id: done.frame_id,
                    chunks: done.chunks,
                    payload: done.buf.freeze(),
                })
            }
            None => Delivery::Pending,
        }
    }

    /// Discard the open frame if no chunk arrived for it within the idle
    /// timeout. Returns the evicted frame id.
    pub fn sweep(&mut self, now: Instant) -> Option<u32> {
        if self.idle_timeout.is_zero() {
            return None;
        }
        let idle = self
            .open
            .as_ref()
            .is_some_and(|open| now.saturating_duration_since(open.last_seen) >= self.idle_timeout);
        if !idle {
            return None;
        }

        let evicted = self.open.take()?;
        self.stats.frames_evicted += 1;
        debug!(
            frame_id = evicted.frame_id,
            bytes = evicted.buf.len(),
            idle_timeout = ?self.idle_timeout,
            "evicting idle frame"
        );
        Some(evicted.frame_id)
    }

    /// Frame id and byte count of the open frame, if any.
    pub fn open_frame(&self) -> Option<(u32, usize)> {
        self.open
            .as_ref()
            .map(|open| (open.frame_id, open.buf.len()))
    }

    pub fn policy(&self) -> SequencePolicy {
        self.policy
    }

    pub fn stats(&self) -> &ReassemblerStats {
        &self.stats
    }

    /// Drop any open frame without counting it.
    pub fn reset(&mut self) {
        self.open = None;
    }

    fn check_continuation(&mut self, header: &FrameHeader) -> Option<DropReason> {
        let open = match &self.open {
            None => {
                return Some(DropReason::NoOpenFrame {
                    frame_id: header.frame_id,
                })
            }
            Some(open) => open,
        };

        if open.frame_id != header.frame_id {
            return Some(DropReason::FrameMismatch {
                open: open.frame_id,
                got: header.frame_id,
            });
        }

        if self.policy == SequencePolicy::Strict && header.chunk_id != open.next_chunk_id {
            let reason = DropReason::OutOfSequence {
                frame_id: open.frame_id,
                expected: open.next_chunk_id,
                got: header.chunk_id,
            };
            self.open = None;
            self.stats.frames_out_of_sequence += 1;
            return Some(reason);
        }

        None
    }

    fn dropped(&mut self, reason: DropReason) -> Delivery {
        self.stats.chunks_dropped += 1;
        trace!(%reason, "chunk dropped");
        Delivery::Dropped(reason)
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::from_config(&LinkConfig::default())
    }
}
