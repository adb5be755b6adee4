//! Message types carried between chain replicas

use serde::{Deserialize, Serialize};

/// Operation identifier, unique per originating submission
pub type MessageId = i64;

/// An operation travelling from the head toward the tail.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainMessage {
    /// Submission identifier
    pub id: MessageId,
    /// Opaque operation payload
    pub op: String,
}

impl ChainMessage {
    /// Create a new chain message
    pub fn new(id: MessageId, op: impl Into<String>) -> Self {
        Self { id, op: op.into() }
    }

    /// The acknowledgment the tail produces for this message
    pub fn ack(&self) -> AckMessage {
        AckMessage { id: self.id }
    }
}

/// Completion acknowledgment travelling from the tail back to the head.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AckMessage {
    /// Identifier of the acknowledged [`ChainMessage`]
    pub id: MessageId,
}

impl AckMessage {
    pub fn new(id: MessageId) -> Self {
        Self { id }
    }
}
