//! Chunked frame transmission and reassembly over flow-gated links.
//!
//! Every chunk on the wire is a fixed 10-byte little-endian header followed by
//! `payload_len` payload bytes:
//! - `frame_id` (u32): which frame the chunk belongs to
//! - `chunk_id` (u16): position within the frame
//! - `flags` (u8): START on the first chunk, END on the last
//! - `reserved` (u8): zero
//! - `payload_len` (u16)
//!
//! The sender moves the header and the payload as two separate transfers, each
//! gated on receiver readiness. The receiver keeps at most one frame open.

pub mod codec;
pub mod config;
pub mod error;
pub mod reader;
pub mod reassembler;
pub mod receiver;
pub mod relay;
pub mod transmitter;

pub use codec::{decode_header, encode_header, Chunk, Flags, FrameHeader, HEADER_SIZE};
pub use config::{ConfigError, LinkConfig, DEFAULT_CHUNK_MAX, DEFAULT_LINK_CAPACITY};
pub use error::{ChunkError, Result, TransferStage};
pub use reader::ChunkReader;
pub use reassembler::{
    AssembledFrame, Delivery, DropReason, Reassembler, ReassemblerStats, SequencePolicy,
};
pub use receiver::{ChunkReceiver, FrameConsumer};
pub use relay::{PairingRelay, RelayEvent, RelayStats};
pub use transmitter::{
    plan_chunks, worst_case_wait, ChunkPlan, ChunkTransmitter, FrameReport, PlannedChunk,
};
