//! In-process transport over bounded tokio channels.
//!
//! Used for tests and single-process simulations. Each link direction is a
//! bounded `mpsc` channel, so a slow reader applies backpressure to the
//! writer just like a TCP window would.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::transport::{InboundLink, Listener, MessageSink, MessageSource, OutboundLink, Transport};

/// How often a pending dial re-checks for a listener
const DIAL_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Pending connections a listener may hold before dialers block
const ACCEPT_BACKLOG: usize = 16;

#[derive(Default)]
struct Hub {
    listeners: Mutex<HashMap<String, mpsc::Sender<InboundLink>>>,
    next_peer: AtomicU64,
}

/// Transport whose endpoints all live in the current process.
///
/// Clones share the same address space.
#[derive(Clone)]
pub struct MemoryTransport {
    hub: Arc<Hub>,
    stream_capacity: usize,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new(1)
    }
}

impl MemoryTransport {
    /// Create a transport whose link directions buffer `stream_capacity`
    /// messages.
    pub fn new(stream_capacity: usize) -> Self {
        Self {
            hub: Arc::new(Hub::default()),
            stream_capacity: stream_capacity.max(1),
        }
    }

    /// Whether something is listening on `addr`.
    pub fn is_listening(&self, addr: &str) -> bool {
        self.lookup(addr).is_some()
    }

    fn lookup(&self, addr: &str) -> Option<mpsc::Sender<InboundLink>> {
        let listeners = self.hub.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners.get(addr).filter(|tx| !tx.is_closed()).cloned()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn listen(&self, addr: &str) -> Result<Box<dyn Listener>> {
        let (tx, rx) = mpsc::channel(ACCEPT_BACKLOG);
        {
            let mut listeners = self.hub.listeners.lock().unwrap_or_else(|e| e.into_inner());
            if listeners.get(addr).is_some_and(|tx| !tx.is_closed()) {
                return Err(TransportError::Bind {
                    addr: addr.to_string(),
                    source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
                });
            }
            listeners.insert(addr.to_string(), tx);
        }
        debug!("memory transport listening on {}", addr);

        Ok(Box::new(MemoryListener {
            addr: addr.to_string(),
            rx,
            hub: Arc::clone(&self.hub),
        }))
    }

    async fn dial(&self, addr: &str, deadline: Duration) -> Result<OutboundLink> {
        let expires = Instant::now() + deadline;
        let mut last_error = String::from("no listener");

        loop {
            if let Some(accept_tx) = self.lookup(addr) {
                let (msg_tx, msg_rx) = mpsc::channel(self.stream_capacity);
                let (ack_tx, ack_rx) = mpsc::channel(self.stream_capacity);
                let id = self.hub.next_peer.fetch_add(1, Ordering::Relaxed);

                let inbound = InboundLink {
                    peer: format!("memory-peer-{}", id),
                    messages: Box::new(ChannelSource::new(msg_rx)),
                    acks: Box::new(ChannelSink::new(ack_tx)),
                };
                match tokio::time::timeout_at(expires, accept_tx.send(inbound)).await {
                    Ok(Ok(())) => {
                        return Ok(OutboundLink {
                            peer: addr.to_string(),
                            messages: Box::new(ChannelSink::new(msg_tx)),
                            acks: Box::new(ChannelSource::new(ack_rx)),
                        })
                    }
                    Ok(Err(_)) => last_error = "listener closed".to_string(),
                    Err(_) => last_error = "accept backlog full".to_string(),
                }
            }

            if Instant::now() >= expires {
                return Err(TransportError::DialTimeout {
                    addr: addr.to_string(),
                    deadline,
                    last_error,
                });
            }
            tokio::time::sleep(DIAL_POLL_INTERVAL).await;
        }
    }
}

struct MemoryListener {
    addr: String,
    rx: mpsc::Receiver<InboundLink>,
    hub: Arc<Hub>,
}

#[async_trait]
impl Listener for MemoryListener {
    async fn accept(&mut self) -> Result<InboundLink> {
        self.rx.recv().await.ok_or(TransportError::ListenerClosed)
    }

    fn local_addr(&self) -> String {
        self.addr.clone()
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        self.rx.close();
        let mut listeners = self.hub.listeners.lock().unwrap_or_else(|e| e.into_inner());
        // Only remove our own registration; a successor may have re-bound.
        if listeners.get(&self.addr).is_some_and(|tx| tx.is_closed()) {
            listeners.remove(&self.addr);
        }
    }
}

/// Sending half backed by a bounded channel.
pub struct ChannelSink<T> {
    tx: Option<mpsc::Sender<T>>,
}

impl<T> ChannelSink<T> {
    pub fn new(tx: mpsc::Sender<T>) -> Self {
        Self { tx: Some(tx) }
    }
}

#[async_trait]
impl<T: Send + 'static> MessageSink<T> for ChannelSink<T> {
    async fn send(&mut self, msg: T) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(msg).await.map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) -> Result<()> {
        self.tx = None;
        Ok(())
    }
}

/// Receiving half backed by a bounded channel.
pub struct ChannelSource<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> ChannelSource<T> {
    pub fn new(rx: mpsc::Receiver<T>) -> Self {
        Self { rx }
    }
}

#[async_trait]
impl<T: Send + 'static> MessageSource<T> for ChannelSource<T> {
    async fn recv(&mut self) -> Result<Option<T>> {
        Ok(self.rx.recv().await)
    }
}
