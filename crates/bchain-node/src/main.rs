//! bchain Node binary
//!
//! Runs one replica of the chain over TCP. The head also runs the
//! reference workload and logs the acks that come back.

use std::sync::Arc;

use bchain_node::{log_acks, run_workload, supervise, ChainNode, NodeConfig, RelinkPolicy};
use bchain_transfer::TcpTransport;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn print_usage() {
    eprintln!("bchain-node - Run one replica of a 3f+1 chain");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  bchain-node [--addrs a,b,c,d] [--idx N] [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --addrs <list>            Comma-separated replica addresses in chain order");
    eprintln!("  --idx <n>                 Index of this replica (negative: match host name)");
    eprintln!("  --connect-timeout <secs>  Deadline for reaching the successor (default: 60)");
    eprintln!("  --queue-capacity <n>      Capacity of the message and ack queues (default: 10)");
    eprintln!("  --workload <n>            Messages sent by the head (default: 10)");
    eprintln!("  --delay-ms <ms>           Pause between workload messages (default: 10)");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  BCHAIN_ADDRS, BCHAIN_INDEX, BCHAIN_CONNECT_TIMEOUT_SECS,");
    eprintln!("  BCHAIN_QUEUE_CAPACITY, BCHAIN_WORKLOAD_COUNT, BCHAIN_WORKLOAD_DELAY_MS");
    eprintln!("  RUST_LOG  Log filter (default: bchain=info)");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bchain=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = NodeConfig::from_env()?.apply_args(args)?;
    let topology = config.resolve()?;
    tracing::info!("Starting bchain node {} ({} of {})", topology.local(), topology.index(), topology.len());

    let node = ChainNode::new(topology, config.options.clone(), Arc::new(TcpTransport::default()));
    let faults = node.faults()?;
    node.start().await?;

    let stop = CancellationToken::new();
    let supervisor = tokio::spawn(supervise(node.clone(), faults, RelinkPolicy::default(), stop.clone()));

    if node.topology().is_head() {
        tokio::spawn(log_acks(node.acks()?, None));
        let head = node.clone();
        let workload = config.workload.clone();
        tokio::spawn(async move {
            if let Err(e) = run_workload(&head, &workload).await {
                tracing::warn!("workload stopped: {}", e);
            }
        });
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("waiting for ctrl-c: {}", bchain_node::Error::from(e));
    }

    stop.cancel();
    let _ = supervisor.await;
    node.shutdown().await;
    Ok(())
}
