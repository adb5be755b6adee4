//! Bounded FIFO mailboxes between pipeline tasks.
//!
//! A mailbox is a bounded `mpsc` channel tied to a [`CancellationToken`].
//! Cancelling the token closes the mailbox for everyone at once: producers
//! blocked on a full mailbox and consumers blocked on an empty one both wake
//! up with [`QueueClosed`] instead of hanging.

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Operation attempted on a mailbox after shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("queue closed")]
pub struct QueueClosed;

/// Create a mailbox holding at most `capacity` items.
pub fn mailbox<T>(capacity: usize, closed: CancellationToken) -> (MailboxSender<T>, MailboxReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        MailboxSender {
            tx,
            closed: closed.clone(),
        },
        MailboxReceiver { rx, closed },
    )
}

/// Producer side. Cheap to clone.
pub struct MailboxSender<T> {
    tx: mpsc::Sender<T>,
    closed: CancellationToken,
}

impl<T> Clone for MailboxSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            closed: self.closed.clone(),
        }
    }
}

impl<T> MailboxSender<T> {
    /// Enqueue `item`, waiting while the mailbox is full.
    pub async fn send(&self, item: T) -> Result<(), QueueClosed> {
        if self.closed.is_cancelled() {
            return Err(QueueClosed);
        }
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(QueueClosed),
            res = self.tx.send(item) => res.map_err(|_| QueueClosed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }

    /// Free slots right now.
    pub fn available(&self) -> usize {
        self.tx.capacity()
    }

    pub fn max_capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

/// Consumer side. Exactly one exists per mailbox.
pub struct MailboxReceiver<T> {
    rx: mpsc::Receiver<T>,
    closed: CancellationToken,
}

impl<T> MailboxReceiver<T> {
    /// Dequeue the oldest item, waiting while the mailbox is empty.
    pub async fn recv(&mut self) -> Result<T, QueueClosed> {
        if self.closed.is_cancelled() {
            return Err(QueueClosed);
        }
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(QueueClosed),
            item = self.rx.recv() => item.ok_or(QueueClosed),
        }
    }

    /// Items currently queued.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
