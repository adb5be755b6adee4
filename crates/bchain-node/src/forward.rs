//! Message path from the predecessor (or the local submitter) toward the tail.
//!
//! Every replica applies an incoming message locally, then either hands it to
//! the outbound queue or, at the tail, turns it into an ack. The outbound
//! queue is drained by a single sender task per successor link, so messages
//! leave in exactly the order they arrived.

use bchain_topology::ChainTopology;
use bchain_transfer::{AckMessage, ChainMessage, MessageSink};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Operation};
use crate::queue::{MailboxReceiver, MailboxSender, QueueClosed};

/// What happens to a message after it has been applied locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Enqueue for the successor.
    Forward,
    /// Last replica: acknowledge toward the head.
    Terminate,
}

impl Route {
    /// The route is a property of the replica's position, fixed for its lifetime.
    pub fn for_topology(topology: &ChainTopology) -> Self {
        if topology.successor().is_some() {
            Route::Forward
        } else {
            Route::Terminate
        }
    }
}

/// Entry point for messages into a replica.
pub struct ForwardingPipeline {
    route: Route,
    local: String,
    messages: MailboxSender<ChainMessage>,
    acks: MailboxSender<AckMessage>,
    operations: broadcast::Sender<ChainMessage>,
}

impl ForwardingPipeline {
    pub(crate) fn new(
        topology: &ChainTopology,
        messages: MailboxSender<ChainMessage>,
        acks: MailboxSender<AckMessage>,
        operation_buffer: usize,
    ) -> Self {
        let (operations, _) = broadcast::channel(operation_buffer.max(1));
        Self {
            route: Route::for_topology(topology),
            local: topology.local().to_string(),
            messages,
            acks,
            operations,
        }
    }

    pub fn route(&self) -> Route {
        self.route
    }

    /// Feed of every message this replica has applied, in arrival order.
    pub fn subscribe(&self) -> broadcast::Receiver<ChainMessage> {
        self.operations.subscribe()
    }

    pub(crate) fn ack_sender(&self) -> MailboxSender<AckMessage> {
        self.acks.clone()
    }

    /// Apply `msg` and pass it on. Waits while the next queue is full.
    pub async fn accept(&self, msg: ChainMessage) -> Result<(), QueueClosed> {
        self.apply(&msg);
        self.pass_on(msg).await
    }

    /// Apply `msg` locally and publish it to subscribers.
    pub(crate) fn apply(&self, msg: &ChainMessage) {
        debug!(node = %self.local, id = msg.id, op = %msg.op, "applying message");
        // No subscribers is fine.
        let _ = self.operations.send(msg.clone());
    }

    /// Queue an applied message for the successor, or ack it at the tail.
    pub(crate) async fn pass_on(&self, msg: ChainMessage) -> Result<(), QueueClosed> {
        match self.route {
            Route::Forward => self.messages.send(msg).await,
            Route::Terminate => {
                debug!(node = %self.local, id = msg.id, "committed at tail");
                self.acks.send(msg.ack()).await
            }
        }
    }
}

/// Outbound queue state carried from one successor link to the next.
pub(crate) struct OutboundSlot {
    pub(crate) rx: MailboxReceiver<ChainMessage>,
    /// Dequeued but not known to be sent. Goes out first on the next link.
    pub(crate) held: Option<ChainMessage>,
    /// Read from the successor but not yet in the ack queue.
    pub(crate) held_ack: Option<AckMessage>,
}

impl OutboundSlot {
    pub(crate) fn new(rx: MailboxReceiver<ChainMessage>) -> Self {
        Self {
            rx,
            held: None,
            held_ack: None,
        }
    }
}

/// Drain the outbound queue onto the successor link until the link token is
/// cancelled, the queue closes, or a send fails.
///
/// Returns the slot so a later link can resume where this one stopped, along
/// with the send error, if any.
pub(crate) async fn run_sender(
    mut slot: OutboundSlot,
    mut sink: Box<dyn MessageSink<ChainMessage>>,
    token: CancellationToken,
    peer: &str,
) -> (OutboundSlot, Option<Error>) {
    let mut failure = None;

    loop {
        let msg = match slot.held.take() {
            Some(msg) => {
                debug!(peer, id = msg.id, "resending held message");
                msg
            }
            None => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    next = slot.rx.recv() => match next {
                        Ok(msg) => msg,
                        Err(QueueClosed) => break,
                    },
                }
            }
        };

        let id = msg.id;
        let sent = tokio::select! {
            biased;
            _ = token.cancelled() => {
                slot.held = Some(msg);
                break;
            }
            res = sink.send(msg.clone()) => res,
        };

        match sent {
            Ok(()) => debug!(peer, id, "forwarded"),
            Err(e) => {
                warn!(peer, id, "forwarding failed: {}", e);
                slot.held = Some(msg);
                token.cancel();
                failure = Some(Error::transport(peer, Operation::SendMessage, e));
                break;
            }
        }
    }

    if failure.is_none() {
        if let Err(e) = sink.close().await {
            debug!(peer, "closing outbound stream: {}", e);
        }
    }
    (slot, failure)
}
