//! Chain replica: owns the listener, the successor link, and both pipelines.
//!
//! Architecture:
//! - One accept loop; each accepted predecessor link gets a serve task and
//!   exactly one ack relay. A newer predecessor link replaces the one being
//!   served
//! - One link task per successor link, running the message sender and the
//!   ack receiver
//! - Two bounded queues between them; a node-wide cancellation token closes
//!   both at shutdown

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use bchain_topology::ChainTopology;
use bchain_transfer::{ChainMessage, InboundLink, Listener, OutboundLink, Transport, TransportError};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::ack::{self, AckPath, AckStream};
use crate::config::NodeOptions;
use crate::error::{Error, Fault, Operation, Result};
use crate::forward::{self, ForwardingPipeline, OutboundSlot, Route};
use crate::link::{LinkSnapshot, LinkState, Phase};
use crate::queue::mailbox;

/// Pause after a failed accept before trying again.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// A single replica in the chain.
///
/// Cheap to clone; all clones drive the same replica.
#[derive(Clone)]
pub struct ChainNode {
    inner: Arc<Inner>,
}

struct Inner {
    topology: Arc<ChainTopology>,
    options: NodeOptions,
    transport: Arc<dyn Transport>,
    link: LinkState,
    shutdown: CancellationToken,
    tasks: TaskTracker,
    pipeline: ForwardingPipeline,
    /// Outbound queue; `None` while a successor link owns it.
    outbound: tokio::sync::Mutex<Option<OutboundSlot>>,
    /// Ack queue; `None` while a relay or the head's `AckStream` owns it.
    ack_path: Mutex<Option<AckPath>>,
    /// Applied but not yet queued when the previous predecessor link stopped.
    inbound_held: Mutex<Option<ChainMessage>>,
    faults_tx: mpsc::UnboundedSender<Fault>,
    faults_rx: Mutex<Option<mpsc::UnboundedReceiver<Fault>>>,
    local_addr: OnceLock<String>,
    relays_spawned: AtomicU64,
    active_relays: AtomicUsize,
}

impl ChainNode {
    /// Create a replica. Nothing is bound until [`start`](Self::start).
    pub fn new(topology: ChainTopology, options: NodeOptions, transport: Arc<dyn Transport>) -> Self {
        let shutdown = CancellationToken::new();
        let (msg_tx, msg_rx) = mailbox(options.queue_capacity, shutdown.clone());
        let (ack_tx, ack_rx) = mailbox(options.queue_capacity, shutdown.clone());
        let pipeline = ForwardingPipeline::new(&topology, msg_tx, ack_tx, options.operation_buffer);
        let (faults_tx, faults_rx) = mpsc::unbounded_channel();

        Self {
            inner: Arc::new(Inner {
                topology: Arc::new(topology),
                options,
                transport,
                link: LinkState::new(),
                shutdown,
                tasks: TaskTracker::new(),
                pipeline,
                outbound: tokio::sync::Mutex::new(Some(OutboundSlot::new(msg_rx))),
                ack_path: Mutex::new(Some(AckPath::new(ack_rx))),
                inbound_held: Mutex::new(None),
                faults_tx,
                faults_rx: Mutex::new(Some(faults_rx)),
                local_addr: OnceLock::new(),
                relays_spawned: AtomicU64::new(0),
                active_relays: AtomicUsize::new(0),
            }),
        }
    }

    /// Bind the listener, then link to the successor if there is one.
    ///
    /// A dial failure is returned with the node left in `Linking`; queued
    /// messages stay queued and [`relink`](Self::relink) may be retried.
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        let phase = inner.link.phase();
        if phase != Phase::Initializing {
            return Err(Error::InvalidPhase { phase, operation: "start" });
        }

        let local = inner.topology.local();
        let listener = inner
            .transport
            .listen(local)
            .await
            .map_err(|e| Error::transport(local, Operation::Listen, e))?;
        let bound = listener.local_addr();
        let _ = inner.local_addr.set(bound.clone());

        if !inner.link.accepting() {
            // Shut down while binding.
            return Err(Error::QueueClosed);
        }
        info!(
            node = %local,
            index = inner.topology.index(),
            n = inner.topology.len(),
            head = inner.topology.is_head(),
            tail = inner.topology.is_tail(),
            proxy_tail = inner.topology.is_proxy_tail(),
            "listening on {}",
            bound
        );
        inner.tasks.spawn(Arc::clone(inner).accept_loop(listener));

        match inner.pipeline.route() {
            Route::Forward => {
                inner.link.linking();
                Arc::clone(inner).connect().await
            }
            Route::Terminate => {
                inner.link.standalone_tail();
                info!(node = %local, "I'm the tail, so I won't be connecting to anyone!");
                Ok(())
            }
        }
    }

    /// Re-dial the same successor after a link fault.
    ///
    /// The message that was in flight when the link failed is sent first.
    /// It may reach the successor twice.
    pub async fn relink(&self) -> Result<()> {
        let inner = &self.inner;
        let phase = inner.link.phase();
        if !matches!(phase, Phase::Linking) {
            return Err(Error::InvalidPhase { phase, operation: "relink" });
        }
        info!(node = %inner.topology.local(), "relinking to successor");
        Arc::clone(inner).connect().await
    }

    /// Inject a message at the head.
    pub async fn submit(&self, msg: ChainMessage) -> Result<()> {
        let inner = &self.inner;
        if !inner.topology.is_head() {
            return Err(Error::NotHead {
                local: inner.topology.local().to_string(),
            });
        }
        inner.pipeline.accept(msg).await?;
        Ok(())
    }

    /// Take the head's ack stream. Can be taken once.
    pub fn acks(&self) -> Result<AckStream> {
        let inner = &self.inner;
        if !inner.topology.is_head() {
            return Err(Error::NotHead {
                local: inner.topology.local().to_string(),
            });
        }
        inner
            .take_ack_path()
            .map(AckStream::new)
            .ok_or(Error::AlreadyTaken("ack stream"))
    }

    /// Every message this replica applies, in arrival order.
    ///
    /// At the tail this is the commit point. Slow subscribers lag rather
    /// than block the chain.
    pub fn subscribe_operations(&self) -> broadcast::Receiver<ChainMessage> {
        self.inner.pipeline.subscribe()
    }

    /// Take the fault channel. Can be taken once.
    pub fn faults(&self) -> Result<mpsc::UnboundedReceiver<Fault>> {
        lock(&self.inner.faults_rx)
            .take()
            .ok_or(Error::AlreadyTaken("fault channel"))
    }

    /// Stop all tasks, closing both queues. Blocked producers and consumers
    /// return [`Error::QueueClosed`].
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        if inner.link.close() {
            info!(node = %inner.topology.local(), "shutting down");
        }
        inner.shutdown.cancel();
        inner.tasks.close();
        inner.tasks.wait().await;
        debug!(node = %inner.topology.local(), "all tasks stopped");
    }

    pub fn topology(&self) -> &ChainTopology {
        &self.inner.topology
    }

    pub fn phase(&self) -> Phase {
        self.inner.link.phase()
    }

    pub fn has_successor(&self) -> bool {
        self.inner.link.has_successor()
    }

    pub fn link_state(&self) -> &LinkState {
        &self.inner.link
    }

    /// Wait until the link state satisfies `pred`.
    pub async fn wait_for(&self, pred: impl Fn(&LinkSnapshot) -> bool) -> LinkSnapshot {
        self.inner.link.wait_for(pred).await
    }

    /// Address the listener is bound to, once started.
    pub fn local_addr(&self) -> Option<&str> {
        self.inner.local_addr.get().map(String::as_str)
    }

    pub fn options(&self) -> &NodeOptions {
        &self.inner.options
    }

    /// Ack relays started over the node's lifetime.
    pub fn relays_spawned(&self) -> u64 {
        self.inner.relays_spawned.load(Ordering::SeqCst)
    }

    /// Ack relays currently running.
    pub fn active_relays(&self) -> usize {
        self.inner.active_relays.load(Ordering::SeqCst)
    }
}

impl Inner {
    fn report(&self, fault: Fault) {
        if self.shutdown.is_cancelled() {
            return;
        }
        warn!(node = %self.topology.local(), "fault: {}", fault);
        let _ = self.faults_tx.send(fault);
    }

    fn take_ack_path(&self) -> Option<AckPath> {
        lock(&self.ack_path).take()
    }

    fn return_ack_path(&self, path: AckPath) {
        *lock(&self.ack_path) = Some(path);
    }

    async fn connect(self: Arc<Self>) -> Result<()> {
        let Some(successor) = self.topology.successor() else {
            return Err(Error::InvalidPhase {
                phase: self.link.phase(),
                operation: "connect",
            });
        };

        let mut outbound = self.outbound.lock().await;
        let Some(slot) = outbound.take() else {
            return Err(Error::InvalidPhase {
                phase: self.link.phase(),
                operation: "connect",
            });
        };

        info!(node = %self.topology.local(), "connecting to successor {}", successor);
        let dialed = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                *outbound = Some(slot);
                return Err(Error::QueueClosed);
            }
            res = self.transport.dial(successor, self.options.connect_timeout) => res,
        };

        let link = match dialed {
            Ok(link) => link,
            Err(e) => {
                *outbound = Some(slot);
                warn!(node = %self.topology.local(), "could not reach successor {}: {}", successor, e);
                return Err(Error::transport(successor, Operation::Dial, e));
            }
        };

        if !self.link.linked() {
            // Closed while dialing.
            *outbound = Some(slot);
            return Err(Error::QueueClosed);
        }
        info!(node = %self.topology.local(), "linked to successor {}", link.peer);

        let token = self.shutdown.child_token();
        self.tasks.spawn(Arc::clone(&self).run_link(link, slot, token));
        Ok(())
    }

    /// Drive one successor link until it fails or the node shuts down.
    async fn run_link(self: Arc<Self>, link: OutboundLink, mut slot: OutboundSlot, token: CancellationToken) {
        let OutboundLink { peer, messages, acks } = link;

        let receiver = self.tasks.spawn(ack::receive_acks(
            acks,
            self.pipeline.ack_sender(),
            token.clone(),
            peer.clone(),
            slot.held_ack.take(),
        ));
        let (mut slot, send_failure) = forward::run_sender(slot, messages, token.clone(), &peer).await;
        token.cancel();
        let (held_ack, recv_failure) = receiver.await.unwrap_or((None, None));
        slot.held_ack = held_ack;

        let undelivered = slot.held.clone();
        *self.outbound.lock().await = Some(slot);
        self.link.unlinked();
        debug!(node = %self.topology.local(), "link to {} closed", peer);

        if let Some(error) = send_failure.or(recv_failure) {
            self.report(Fault { error, undelivered });
        }
    }

    async fn accept_loop(self: Arc<Self>, mut listener: Box<dyn Listener>) {
        let mut serving: Option<(CancellationToken, JoinHandle<()>)> = None;
        loop {
            let accepted = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                res = listener.accept() => res,
            };

            match accepted {
                Ok(link) => {
                    info!(node = %self.topology.local(), "accepted link from {}", link.peer);
                    if self.topology.is_head() {
                        warn!(node = %self.topology.local(), "the head has no predecessor; refusing link from {}", link.peer);
                        continue;
                    }
                    let previous = serving.take().map(|(token, task)| {
                        if !task.is_finished() {
                            info!(node = %self.topology.local(), "link from {} replaces the current predecessor link", link.peer);
                        }
                        token.cancel();
                        task
                    });
                    let token = self.shutdown.child_token();
                    let task = self.tasks.spawn(Arc::clone(&self).serve(link, token.clone(), previous));
                    serving = Some((token, task));
                }
                Err(TransportError::ListenerClosed) => {
                    self.report(Fault {
                        error: Error::transport(
                            self.topology.local(),
                            Operation::Accept,
                            TransportError::ListenerClosed,
                        ),
                        undelivered: None,
                    });
                    break;
                }
                Err(e) => {
                    warn!(node = %self.topology.local(), "accept failed: {}", e);
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(ACCEPT_RETRY_DELAY) => {}
                    }
                }
            }
        }
        debug!(node = %self.topology.local(), "accept loop stopped");
    }

    /// Serve one predecessor link: read its messages into the pipeline and
    /// relay acks back over it.
    ///
    /// Starts once the `previous` link has stopped and handed back the ack
    /// path, so links are served strictly one after another.
    async fn serve(self: Arc<Self>, link: InboundLink, token: CancellationToken, previous: Option<JoinHandle<()>>) {
        let InboundLink { peer, mut messages, acks } = link;

        if let Some(previous) = previous {
            if let Err(e) = previous.await {
                warn!(node = %self.topology.local(), "previous predecessor link panicked: {}", e);
            }
        }
        let Some(path) = self.take_ack_path() else {
            warn!(node = %self.topology.local(), "ack queue unavailable; dropping link from {}", peer);
            return;
        };

        self.relays_spawned.fetch_add(1, Ordering::SeqCst);
        self.active_relays.fetch_add(1, Ordering::SeqCst);
        let relay = self.tasks.spawn(ack::run_relay(
            path,
            acks,
            token.clone(),
            peer.clone(),
            self.faults_tx.clone(),
        ));

        let mut applied = lock(&self.inbound_held).take();
        if let Some(msg) = &applied {
            debug!(node = %self.topology.local(), id = msg.id, "resuming with message from previous link");
        }
        loop {
            let msg = match applied.take() {
                Some(msg) => msg,
                None => {
                    let next = tokio::select! {
                        biased;
                        _ = token.cancelled() => break,
                        next = messages.recv() => next,
                    };
                    match next {
                        Ok(Some(msg)) => {
                            self.pipeline.apply(&msg);
                            msg
                        }
                        Ok(None) => {
                            info!(node = %self.topology.local(), "predecessor {} closed the link", peer);
                            break;
                        }
                        Err(e) => {
                            self.report(Fault {
                                error: Error::transport(peer.clone(), Operation::ReceiveMessage, e),
                                undelivered: None,
                            });
                            break;
                        }
                    }
                }
            };

            let outgoing = msg.clone();
            let passed = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    applied = Some(msg);
                    break;
                }
                res = self.pipeline.pass_on(outgoing) => res,
            };
            if passed.is_err() {
                break;
            }
        }

        token.cancel();
        if let Some(msg) = applied {
            *lock(&self.inbound_held) = Some(msg);
        }
        match relay.await {
            Ok(path) => self.return_ack_path(path),
            Err(e) => warn!(node = %self.topology.local(), "ack relay for {} panicked: {}", peer, e),
        }
        self.active_relays.fetch_sub(1, Ordering::SeqCst);
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
