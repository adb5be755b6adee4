//! bchain Transfer - ordered message streams between chain replicas
//!
//! This crate provides:
//! - The [`Transport`] abstraction the replica core is written against
//! - A TCP transport framing messages as newline-delimited JSON
//! - An in-process transport over bounded channels for tests and simulation
//! - The [`ChainMessage`] and [`AckMessage`] wire types
//!
//! # Flow Control
//!
//! Neither transport buffers without bound. When the reading side of a link
//! stops consuming, the writing side eventually blocks in `send`, which is
//! how congestion at the tail propagates back to the head.
//!
//! # Example
//!
//! ```rust,ignore
//! use bchain_transfer::{ChainMessage, TcpTransport, Transport};
//! use std::time::Duration;
//!
//! let transport = TcpTransport::default();
//! let mut link = transport.dial("10.0.0.2:9000", Duration::from_secs(60)).await?;
//! link.messages.send(ChainMessage::new(0, "SaveOp")).await?;
//! let ack = link.acks.recv().await?;
//! ```

pub mod error;
pub mod memory;
pub mod tcp;
pub mod transport;
pub mod types;

// Re-export main types at crate root
pub use error::{Result, TransportError};
pub use memory::MemoryTransport;
pub use tcp::{TcpConfig, TcpTransport};
pub use transport::{InboundLink, Listener, MessageSink, MessageSource, OutboundLink, Transport};
pub use types::{AckMessage, ChainMessage, MessageId};
