//! Error types for bchain-transfer.

use std::time::Duration;

use thiserror::Error;

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Failures of the streaming transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not start listening.
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The dial deadline passed before a connection was established.
    #[error("dial to {addr} timed out after {deadline:?} (last error: {last_error})")]
    DialTimeout {
        addr: String,
        deadline: Duration,
        last_error: String,
    },

    /// The remote endpoint refused or dropped the connection setup.
    #[error("failed to dial {addr}: {reason}")]
    Dial { addr: String, reason: String },

    /// Accepting an inbound connection failed.
    #[error("accept failed: {0}")]
    Accept(#[source] std::io::Error),

    /// The listener has been shut down.
    #[error("listener closed")]
    ListenerClosed,

    /// Writing to the stream failed.
    #[error("send failed: {0}")]
    Send(#[source] std::io::Error),

    /// Reading from the stream failed.
    #[error("receive failed: {0}")]
    Recv(#[source] std::io::Error),

    /// A frame could not be encoded or decoded.
    #[error("malformed frame: {0}")]
    Frame(#[from] serde_json::Error),

    /// A frame grew past the configured limit without a terminator.
    #[error("frame exceeds {limit} bytes")]
    FrameTooLarge { limit: usize },

    /// The other side of the stream has gone away.
    #[error("stream closed by peer")]
    Closed,
}
