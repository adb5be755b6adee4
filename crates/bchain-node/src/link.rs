//! Node lifecycle and successor link state.
//!
//! ```text
//! Initializing ──▶ Accepting ──▶ Linking ──▶ Linked ──▶ Closed
//!                      │            ▲          │
//!                      │            └──────────┘  (link fault, relink)
//!                      └──────▶ StandaloneTail ──────▶ Closed
//! ```
//!
//! The state lives in a `watch` channel. Link setup is the only writer of
//! `has_successor`; every reader sees a consistent snapshot and can wait for
//! a phase without polling.

use tokio::sync::watch;
use tracing::debug;

/// Lifecycle phase of a replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Constructed, nothing bound yet.
    Initializing,
    /// Listener bound; accepting links from the predecessor.
    Accepting,
    /// Dialing the successor.
    Linking,
    /// Outbound link to the successor established.
    Linked,
    /// Last replica; never dials.
    StandaloneTail,
    /// Shut down. Terminal.
    Closed,
}

impl Phase {
    pub fn is_closed(self) -> bool {
        self == Phase::Closed
    }
}

/// Point-in-time view of the link state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSnapshot {
    pub phase: Phase,
    /// Whether an outbound link to the successor is currently up.
    pub has_successor: bool,
    /// Number of successor links established so far.
    pub generation: u64,
}

/// Shared, versioned link state.
#[derive(Debug)]
pub struct LinkState {
    tx: watch::Sender<LinkSnapshot>,
}

impl Default for LinkState {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkState {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(LinkSnapshot {
            phase: Phase::Initializing,
            has_successor: false,
            generation: 0,
        });
        Self { tx }
    }

    pub fn snapshot(&self) -> LinkSnapshot {
        *self.tx.borrow()
    }

    pub fn phase(&self) -> Phase {
        self.tx.borrow().phase
    }

    pub fn has_successor(&self) -> bool {
        self.tx.borrow().has_successor
    }

    pub fn subscribe(&self) -> watch::Receiver<LinkSnapshot> {
        self.tx.subscribe()
    }

    /// Wait until `pred` holds. Returns the matching snapshot.
    pub async fn wait_for(&self, pred: impl Fn(&LinkSnapshot) -> bool) -> LinkSnapshot {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let snap = match rx.wait_for(|s| pred(s)).await {
            Ok(snap) => *snap,
            Err(_) => self.snapshot(),
        };
        snap
    }

    pub(crate) fn accepting(&self) -> bool {
        self.transition(Phase::Accepting, |s| s.phase == Phase::Initializing)
    }

    pub(crate) fn linking(&self) -> bool {
        self.transition(Phase::Linking, |s| {
            matches!(s.phase, Phase::Accepting | Phase::Linking | Phase::Linked)
        })
    }

    pub(crate) fn standalone_tail(&self) -> bool {
        self.transition(Phase::StandaloneTail, |s| s.phase == Phase::Accepting)
    }

    /// Record a freshly established successor link.
    pub(crate) fn linked(&self) -> bool {
        self.tx.send_if_modified(|s| {
            if s.phase != Phase::Linking {
                return false;
            }
            s.phase = Phase::Linked;
            s.has_successor = true;
            s.generation += 1;
            debug!(generation = s.generation, "successor link established");
            true
        })
    }

    /// Record the loss of the successor link.
    pub(crate) fn unlinked(&self) -> bool {
        self.tx.send_if_modified(|s| {
            if s.phase != Phase::Linked {
                return false;
            }
            s.phase = Phase::Linking;
            s.has_successor = false;
            true
        })
    }

    /// Enter the terminal phase. Returns false if already closed.
    pub(crate) fn close(&self) -> bool {
        self.tx.send_if_modified(|s| {
            if s.phase == Phase::Closed {
                return false;
            }
            s.phase = Phase::Closed;
            s.has_successor = false;
            true
        })
    }

    fn transition(&self, to: Phase, allowed: impl Fn(&LinkSnapshot) -> bool) -> bool {
        self.tx.send_if_modified(|s| {
            if !allowed(s) {
                return false;
            }
            s.phase = to;
            true
        })
    }
}
