//! Harness for driving whole chains in tests.

use std::sync::Arc;
use std::time::Duration;

use bchain_node::{ChainNode, NodeOptions, Result};
use bchain_topology::{ChainTopology, LocalIdentity};
use bchain_transfer::Transport;

/// A running chain, head first.
pub struct Cluster {
    pub addrs: Vec<String>,
    pub nodes: Vec<ChainNode>,
    transport: Arc<dyn Transport>,
    options: NodeOptions,
}

impl Cluster {
    /// Options suited to tests: short connect deadline, small queues.
    pub fn test_options(queue_capacity: usize) -> NodeOptions {
        NodeOptions {
            connect_timeout: Duration::from_secs(5),
            queue_capacity,
            operation_buffer: 4096,
        }
    }

    /// Build one replica per address without starting any of them.
    pub fn build(addrs: Vec<String>, transport: Arc<dyn Transport>, options: NodeOptions) -> Result<Self> {
        let mut cluster = Self {
            addrs,
            nodes: Vec::new(),
            transport,
            options,
        };
        for i in 0..cluster.addrs.len() {
            cluster.nodes.push(cluster.replica(i)?);
        }
        Ok(cluster)
    }

    /// Build and start one replica per address, tail first.
    pub async fn start(addrs: Vec<String>, transport: Arc<dyn Transport>, options: NodeOptions) -> Result<Self> {
        let cluster = Self::build(addrs, transport, options)?;
        for node in cluster.nodes.iter().rev() {
            node.start().await?;
        }
        Ok(cluster)
    }

    /// A fresh, unstarted replica for position `index`.
    pub fn replica(&self, index: usize) -> Result<ChainNode> {
        let topology = ChainTopology::from_identity(self.addrs.clone(), &LocalIdentity::Index(index))?;
        Ok(ChainNode::new(topology, self.options.clone(), Arc::clone(&self.transport)))
    }

    pub fn head(&self) -> &ChainNode {
        &self.nodes[0]
    }

    pub fn tail(&self) -> &ChainNode {
        &self.nodes[self.nodes.len() - 1]
    }

    pub async fn shutdown(&self) {
        for node in &self.nodes {
            node.shutdown().await;
        }
    }
}

/// `n` in-process addresses.
pub fn memory_addrs(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("replica-{}:9000", i)).collect()
}

/// `n` loopback addresses with ports that were free a moment ago.
pub fn loopback_addrs(n: usize) -> std::io::Result<Vec<String>> {
    let listeners = (0..n)
        .map(|_| std::net::TcpListener::bind("127.0.0.1:0"))
        .collect::<std::io::Result<Vec<_>>>()?;
    listeners
        .iter()
        .map(|l| l.local_addr().map(|a| a.to_string()))
        .collect()
}
