//! Link abstraction for chunklink.
//!
//! Everything that physically moves bytes lives here:
//! - [`Link`]: one call is one atomic transfer (a chip-select window, a datagram)
//! - [`ChunkSource`]: one call yields one discrete message from the far side
//! - [`ReadinessGate`]: receiver-controlled flow control for links that have none
//!
//! The framing protocol in `chunklink-frame` is written against these traits only.

pub mod error;
pub mod gate;
pub mod stream;
pub mod traits;
pub mod udp;

pub use error::{Result, TransportError};
pub use gate::{AlwaysReady, PollingGate, ReadinessGate, ReadyFlag, ReadySignal};
pub use stream::StreamLink;
pub use traits::{ChunkSource, Link};
pub use udp::{UdpLink, UdpSource, MAX_DATAGRAM};
