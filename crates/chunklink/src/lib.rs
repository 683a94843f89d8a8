//! Chunked frame transfer over flow-gated links.
//!
//! A producer hands whole frames to a transmitter, which splits them into
//! chunks small enough for the link and moves each chunk as a header transfer
//! followed by a payload transfer, waiting for the receiver's ready line
//! before each. The receiver rebuilds frames from the chunks in arrival order.
//!
//! # Crate Structure
//!
//! - [`transport`]: links, chunk sources and readiness gates (UDP, byte streams)
//! - [`frame`]: header codec, transmitter, reassembler, receiver and pairing relay

/// Re-export transport types.
pub mod transport {
    pub use chunklink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use chunklink_frame::*;
}
