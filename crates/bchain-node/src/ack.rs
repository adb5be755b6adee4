//! Acknowledgment path from the tail back toward the head.
//!
//! Acks arrive on the successor link (or are produced locally at the tail),
//! land in the node's ack queue, and are relayed to the predecessor by one
//! relay task per inbound link. At the head there is no predecessor; the ack
//! queue is handed to the submitter as an [`AckStream`].

use bchain_transfer::{AckMessage, MessageSink, MessageSource, TransportError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Fault, Operation, Result};
use crate::queue::{MailboxReceiver, MailboxSender, QueueClosed};

/// Ack queue state carried from one inbound link to the next.
pub(crate) struct AckPath {
    pub(crate) rx: MailboxReceiver<AckMessage>,
    /// Dequeued but not relayed when the previous link went away.
    pub(crate) pending: Option<AckMessage>,
}

impl AckPath {
    pub(crate) fn new(rx: MailboxReceiver<AckMessage>) -> Self {
        Self { rx, pending: None }
    }
}

/// Acks for messages submitted at the head, in the order the tail
/// committed them.
///
/// The ack queue is bounded. A head that never drains this stream will
/// eventually stall the whole chain.
pub struct AckStream {
    path: AckPath,
}

impl AckStream {
    pub(crate) fn new(path: AckPath) -> Self {
        Self { path }
    }

    /// Next ack. Fails with [`Error::QueueClosed`] once the node shuts down.
    pub async fn recv(&mut self) -> Result<AckMessage> {
        if let Some(ack) = self.path.pending.take() {
            return Ok(ack);
        }
        Ok(self.path.rx.recv().await?)
    }

    /// Acks already waiting.
    pub fn len(&self) -> usize {
        self.path.rx.len() + usize::from(self.path.pending.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Read acks from the successor into the ack queue.
///
/// `held` is an ack an earlier link read but could not queue; it is queued
/// first. Ends quietly when the link token is cancelled or the node shuts
/// down, handing back any ack it could not queue in time. A read error or an
/// unexpected end of stream cancels the link and is returned.
pub(crate) async fn receive_acks(
    mut source: Box<dyn MessageSource<AckMessage>>,
    acks: MailboxSender<AckMessage>,
    token: CancellationToken,
    peer: String,
    mut held: Option<AckMessage>,
) -> (Option<AckMessage>, Option<Error>) {
    loop {
        if let Some(ack) = held.take() {
            let queued = tokio::select! {
                biased;
                _ = token.cancelled() => return (Some(ack), None),
                res = acks.send(ack) => res,
            };
            if queued.is_err() {
                return (None, None);
            }
            continue;
        }

        let next = tokio::select! {
            biased;
            _ = token.cancelled() => return (None, None),
            next = source.recv() => next,
        };

        let failure = match next {
            Ok(Some(ack)) => {
                debug!(peer = %peer, id = ack.id, "ack from successor");
                held = Some(ack);
                continue;
            }
            Ok(None) => TransportError::Closed,
            Err(e) => e,
        };

        if token.is_cancelled() {
            return (None, None);
        }
        warn!(peer = %peer, "ack stream from successor failed: {}", failure);
        token.cancel();
        return (None, Some(Error::transport(peer, Operation::ReceiveAck, failure)));
    }
}

/// Relay the ack queue to the predecessor until the link ends.
///
/// Runs once per inbound link. The path is handed back so the next link
/// continues with the same queue.
pub(crate) async fn run_relay(
    mut path: AckPath,
    mut sink: Box<dyn MessageSink<AckMessage>>,
    token: CancellationToken,
    peer: String,
    faults: mpsc::UnboundedSender<Fault>,
) -> AckPath {
    debug!(peer = %peer, "ack relay started");

    loop {
        let ack = match path.pending.take() {
            Some(ack) => ack,
            None => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    next = path.rx.recv() => match next {
                        Ok(ack) => ack,
                        Err(QueueClosed) => break,
                    },
                }
            }
        };

        let sent = tokio::select! {
            biased;
            _ = token.cancelled() => {
                path.pending = Some(ack);
                break;
            }
            res = sink.send(ack) => res,
        };

        if let Err(e) = sent {
            warn!(peer = %peer, id = ack.id, "relaying ack failed: {}", e);
            path.pending = Some(ack);
            token.cancel();
            let _ = faults.send(Fault {
                error: Error::transport(peer.clone(), Operation::RelayAck, e),
                undelivered: None,
            });
            break;
        }
        debug!(peer = %peer, id = ack.id, "ack relayed");
    }

    let _ = sink.close().await;
    debug!(peer = %peer, "ack relay stopped");
    path
}
