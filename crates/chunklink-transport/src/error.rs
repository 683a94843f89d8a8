/// Errors that can occur while moving bytes across a link.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind the local endpoint.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    /// Failed to connect to the remote endpoint.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    /// An I/O error occurred on the link.
    #[error("link I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A single transfer is larger than the link can carry atomically.
    #[error("transfer too large ({size} bytes, max {max})")]
    TransferTooLarge { size: usize, max: usize },

    /// The link accepted fewer bytes than one transfer.
    #[error("short transfer ({written} of {expected} bytes)")]
    ShortTransfer { written: usize, expected: usize },

    /// The far side closed the link.
    #[error("link closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, TransportError>;
