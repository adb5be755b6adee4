//! Fault handling for a running replica.
//!
//! Faults on the successor link are repaired by re-dialing the same
//! successor with exponential backoff. A link that drops again soon after
//! being restored also backs off before the next attempt. Faults on the
//! predecessor side are only logged; the predecessor is the one that
//! reconnects.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{Error, Fault, Result};
use crate::link::Phase;
use crate::node::ChainNode;

/// Retry schedule for [`relink_with_backoff`].
#[derive(Debug, Clone)]
pub struct RelinkPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// A restored link that fails sooner than this delays the next relink.
    pub stable_after: Duration,
}

impl Default for RelinkPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            stable_after: Duration::from_secs(10),
        }
    }
}

/// Tracks links that fail right after a successful relink.
#[derive(Debug)]
struct Flapping {
    restored_at: Option<Instant>,
    backoff: Duration,
}

impl Flapping {
    fn new(policy: &RelinkPolicy) -> Self {
        Self {
            restored_at: None,
            backoff: policy.initial_backoff,
        }
    }

    fn restored(&mut self, at: Instant) {
        self.restored_at = Some(at);
    }

    /// How long to wait before relinking after a fault seen at `now`.
    fn delay(&mut self, now: Instant, policy: &RelinkPolicy) -> Duration {
        match self.restored_at.take() {
            Some(at) if now.saturating_duration_since(at) < policy.stable_after => {
                let delay = self.backoff;
                self.backoff = (self.backoff * 2).min(policy.max_backoff);
                delay
            }
            _ => {
                self.backoff = policy.initial_backoff;
                Duration::ZERO
            }
        }
    }
}

/// Call [`ChainNode::relink`] until it succeeds or the attempts run out.
pub async fn relink_with_backoff(node: &ChainNode, policy: &RelinkPolicy) -> Result<()> {
    let mut backoff = policy.initial_backoff;
    let mut attempt = 1;
    loop {
        match node.relink().await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                warn!(attempt, "relink failed: {}; retrying in {:?}", e, backoff);
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(policy.max_backoff);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Consume faults until `stop` is cancelled or the node's fault channel
/// closes, relinking whenever the successor link drops.
pub async fn supervise(
    node: ChainNode,
    mut faults: mpsc::UnboundedReceiver<Fault>,
    policy: RelinkPolicy,
    stop: CancellationToken,
) {
    let mut flapping = Flapping::new(&policy);
    loop {
        let fault = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            fault = faults.recv() => match fault {
                Some(fault) => fault,
                None => break,
            },
        };

        if !fault.needs_relink() || node.phase() != Phase::Linking {
            continue;
        }

        let delay = flapping.delay(Instant::now(), &policy);
        if !delay.is_zero() {
            warn!(node = %node.topology().local(), "successor link dropped soon after relink; waiting {:?}", delay);
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let relinked = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            res = relink_with_backoff(&node, &policy) => res,
        };
        match relinked {
            Ok(()) => {
                flapping.restored(Instant::now());
                info!(node = %node.topology().local(), "successor link restored");
            }
            Err(Error::QueueClosed) => break,
            Err(e) => warn!(node = %node.topology().local(), "giving up on successor: {}", e),
        }
    }
}
