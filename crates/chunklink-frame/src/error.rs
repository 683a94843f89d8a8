use std::fmt;
use std::time::Duration;

use chunklink_transport::TransportError;

use crate::config::ConfigError;

/// Which of a chunk's two transfers a failure happened before.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStage {
    Header,
    Payload,
}

impl fmt::Display for TransferStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferStage::Header => f.write_str("header"),
            TransferStage::Payload => f.write_str("payload"),
        }
    }
}

/// Errors that can occur while chunking, sending or reassembling frames.
#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    /// Fewer bytes than a full header were supplied.
    #[error("malformed chunk header ({len} bytes, need 10)")]
    MalformedHeader { len: usize },

    /// The payload is shorter than the header's `payload_len`.
    #[error("short chunk payload ({available} bytes, header declares {declared})")]
    ShortPayload { declared: usize, available: usize },

    /// The frame needs more chunks than a u16 chunk_id can number.
    #[error("frame too large ({size} bytes, max {max} at this chunk size)")]
    FrameTooLarge { size: usize, max: usize },

    /// The receiver never signalled ready; the rest of the frame was abandoned.
    #[error("receiver not ready before {stage} of frame {frame_id} chunk {chunk_id} (waited {waited:?})")]
    ReadyTimeout {
        frame_id: u32,
        chunk_id: u16,
        stage: TransferStage,
        waited: Duration,
    },

    /// Link configuration was rejected.
    #[error("invalid link configuration: {0}")]
    Config(#[from] ConfigError),

    /// The underlying link failed.
    #[error("link error: {0}")]
    Transport(#[from] TransportError),
}

pub type Result<T> = std::result::Result<T, ChunkError>;
