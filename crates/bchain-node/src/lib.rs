//! bchain Node - a replica in a 3f+1 chain
//!
//! Messages enter at the head, travel replica by replica to the tail, and
//! the tail's acknowledgments travel back the same way.
//!
//! # Architecture
//!
//! - **Link**: lifecycle phases and the successor link state (`watch` channel)
//! - **Queue**: bounded mailboxes that close together on shutdown
//! - **Forward**: the message path toward the tail
//! - **Ack**: the acknowledgment path toward the head
//! - **Node**: listener, successor link, and task ownership
//! - **Supervisor**: relinks to the successor after a fault
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bchain_node::{ChainNode, NodeConfig};
//! use bchain_transfer::{ChainMessage, TcpTransport};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = NodeConfig::from_env()?;
//!     let node = ChainNode::new(config.resolve()?, config.options, Arc::new(TcpTransport::default()));
//!     node.start().await?;
//!     if node.topology().is_head() {
//!         let mut acks = node.acks()?;
//!         node.submit(ChainMessage::new(7, "SaveOp")).await?;
//!         println!("acked {}", acks.recv().await?.id);
//!     }
//!     node.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod ack;
pub mod config;
pub mod error;
pub mod forward;
pub mod link;
pub mod node;
pub mod queue;
pub mod supervisor;
pub mod workload;

pub use ack::AckStream;
pub use config::{NodeConfig, NodeOptions, Workload};
pub use error::{Error, Fault, Operation, Result};
pub use forward::{ForwardingPipeline, Route};
pub use link::{LinkSnapshot, LinkState, Phase};
pub use node::ChainNode;
pub use queue::QueueClosed;
pub use supervisor::{relink_with_backoff, supervise, RelinkPolicy};
pub use workload::{log_acks, run_workload, save_op};
