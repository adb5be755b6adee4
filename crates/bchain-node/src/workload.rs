//! Reference workload driven from the head.

use bchain_transfer::{ChainMessage, MessageId};
use tracing::info;

use crate::ack::AckStream;
use crate::config::Workload;
use crate::error::Result;
use crate::node::ChainNode;

/// Operation text for messages originating at `origin`.
pub fn save_op(origin: &str) -> String {
    format!("SaveOp from {}", origin)
}

/// Submit `workload.count` messages with ids `0..count`, pausing
/// `workload.delay` between them. Returns the number submitted.
pub async fn run_workload(node: &ChainNode, workload: &Workload) -> Result<u32> {
    let origin = node.topology().local().to_string();
    info!(node = %origin, count = workload.count, "starting workload");

    for n in 0..workload.count {
        let id = MessageId::from(n);
        node.submit(ChainMessage::new(id, save_op(&origin))).await?;
        info!("Sent message {}", id);
        if !workload.delay.is_zero() {
            tokio::time::sleep(workload.delay).await;
        }
    }
    Ok(workload.count)
}

/// Log acks as they come back. Stops after `limit` acks, if given, or when
/// the node shuts down. Returns the number of acks seen.
pub async fn log_acks(mut acks: AckStream, limit: Option<u64>) -> u64 {
    let mut seen = 0;
    while limit.map_or(true, |l| seen < l) {
        match acks.recv().await {
            Ok(ack) => {
                info!("Ack for ID: {}", ack.id);
                seen += 1;
            }
            Err(_) => break,
        }
    }
    seen
}
