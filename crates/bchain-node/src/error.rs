//! Error types for bchain-node.

use std::fmt;

use bchain_topology::ConfigError;
use bchain_transfer::{ChainMessage, TransportError};
use thiserror::Error;

use crate::link::Phase;
use crate::queue::QueueClosed;

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Which link operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Listen,
    Accept,
    Dial,
    /// Forwarding a message to the successor.
    SendMessage,
    /// Reading acks from the successor.
    ReceiveAck,
    /// Reading messages from the predecessor.
    ReceiveMessage,
    /// Relaying acks to the predecessor.
    RelayAck,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Listen => "listen",
            Operation::Accept => "accept",
            Operation::Dial => "dial",
            Operation::SendMessage => "send message",
            Operation::ReceiveAck => "receive ack",
            Operation::ReceiveMessage => "receive message",
            Operation::RelayAck => "relay ack",
        };
        f.write_str(s)
    }
}

/// Errors that can occur while running a replica.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid chain configuration. Raised before any network activity.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A link operation failed.
    #[error("{operation} on link with {peer} failed: {source}")]
    Transport {
        peer: String,
        operation: Operation,
        #[source]
        source: TransportError,
    },

    /// The node has been shut down.
    #[error("queue closed")]
    QueueClosed,

    /// Submissions are only accepted at the head.
    #[error("{local} is not the head of the chain")]
    NotHead { local: String },

    /// The node is in the wrong phase for the requested operation.
    #[error("cannot {operation} while {phase:?}")]
    InvalidPhase {
        phase: Phase,
        operation: &'static str,
    },

    /// A take-once handle has already been handed out.
    #[error("{0} already taken")]
    AlreadyTaken(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn transport(peer: impl Into<String>, operation: Operation, source: TransportError) -> Self {
        Error::Transport {
            peer: peer.into(),
            operation,
            source,
        }
    }

    /// Whether a supervisor may reasonably retry after this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transport { .. })
    }
}

impl From<QueueClosed> for Error {
    fn from(_: QueueClosed) -> Self {
        Error::QueueClosed
    }
}

/// A steady-state failure reported to the supervising layer.
#[derive(Debug)]
pub struct Fault {
    pub error: Error,
    /// Message that was in flight when the link failed. It is kept at the
    /// front of the outbound queue and sent first after a relink.
    pub undelivered: Option<ChainMessage>,
}

impl Fault {
    /// Whether the fault is on the successor link, so `relink` can repair it.
    pub fn needs_relink(&self) -> bool {
        matches!(
            self.error,
            Error::Transport {
                operation: Operation::Dial | Operation::SendMessage | Operation::ReceiveAck,
                ..
            }
        )
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.undelivered {
            Some(msg) => write!(f, "{} (message {} in flight)", self.error, msg.id),
            None => write!(f, "{}", self.error),
        }
    }
}
