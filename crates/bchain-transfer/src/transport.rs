//! Transport abstraction for replica links.
//!
//! A link is one ordered, bidirectional stream between adjacent replicas.
//! The dialing side (predecessor) sends [`ChainMessage`]s and receives
//! [`AckMessage`]s; the accepting side (successor) does the opposite.
//!
//! ```text
//! predecessor                          successor
//! OutboundLink.messages ──ChainMessage──▶ InboundLink.messages
//! OutboundLink.acks     ◀──AckMessage─── InboundLink.acks
//! ```
//!
//! Halves are boxed trait objects so the node core does not care which
//! transport produced them.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{AckMessage, ChainMessage};

/// Writing half of a link.
#[async_trait]
pub trait MessageSink<T: Send + 'static>: Send {
    /// Send one message. Blocks while the peer applies backpressure.
    async fn send(&mut self, msg: T) -> Result<()>;

    /// Close the writing direction. The peer observes end-of-stream.
    async fn close(&mut self) -> Result<()>;
}

/// Reading half of a link.
#[async_trait]
pub trait MessageSource<T: Send + 'static>: Send {
    /// Receive the next message, or `None` once the peer closed its side.
    async fn recv(&mut self) -> Result<Option<T>>;
}

/// Link from a replica to its successor.
pub struct OutboundLink {
    /// Address that was dialed
    pub peer: String,
    /// Operations toward the successor
    pub messages: Box<dyn MessageSink<ChainMessage>>,
    /// Acknowledgments from the successor
    pub acks: Box<dyn MessageSource<AckMessage>>,
}

/// Link accepted from a predecessor.
pub struct InboundLink {
    /// Remote endpoint as reported by the transport
    pub peer: String,
    /// Operations from the predecessor
    pub messages: Box<dyn MessageSource<ChainMessage>>,
    /// Acknowledgments toward the predecessor
    pub acks: Box<dyn MessageSink<AckMessage>>,
}

/// Accept loop handle returned by [`Transport::listen`].
#[async_trait]
pub trait Listener: Send {
    /// Wait for the next inbound link.
    async fn accept(&mut self) -> Result<InboundLink>;

    /// Address this listener is reachable at.
    fn local_addr(&self) -> String;
}

/// Connection factory between addressed endpoints.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Start accepting inbound links on `addr`.
    async fn listen(&self, addr: &str) -> Result<Box<dyn Listener>>;

    /// Connect to `addr`, retrying until `deadline` elapses.
    ///
    /// Replicas start independently, so the successor may not be listening
    /// yet when this is first called.
    async fn dial(&self, addr: &str, deadline: Duration) -> Result<OutboundLink>;
}
