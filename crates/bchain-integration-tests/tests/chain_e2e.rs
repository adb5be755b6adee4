//! End-to-end tests over whole chains.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use bchain_integration_tests::{loopback_addrs, memory_addrs, Cluster};
use bchain_node::{supervise, ChainNode, Error, Phase, RelinkPolicy};
use bchain_transfer::{ChainMessage, MemoryTransport, TcpTransport, Transport};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const LIMIT: Duration = Duration::from_secs(10);

async fn memory_cluster(n: usize, queue_capacity: usize) -> Cluster {
    Cluster::start(
        memory_addrs(n),
        Arc::new(MemoryTransport::default()),
        Cluster::test_options(queue_capacity),
    )
    .await
    .unwrap()
}

async fn single_message_round_trip(cluster: &Cluster) {
    let mut committed = cluster.tail().subscribe_operations();
    let mut acks = cluster.head().acks().unwrap();

    cluster.head().submit(ChainMessage::new(7, "SaveOp")).await.unwrap();

    let delivered = timeout(LIMIT, committed.recv()).await.unwrap().unwrap();
    assert_eq!(delivered, ChainMessage::new(7, "SaveOp"));
    let ack = timeout(LIMIT, acks.recv()).await.unwrap().unwrap();
    assert_eq!(ack.id, 7);

    // Exactly once at both ends.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(committed.try_recv().is_err());
    assert!(acks.is_empty());
}

#[tokio::test]
async fn four_replicas_in_memory() {
    let cluster = memory_cluster(4, 10).await;
    assert_eq!(cluster.head().phase(), Phase::Linked);
    assert_eq!(cluster.tail().phase(), Phase::StandaloneTail);
    single_message_round_trip(&cluster).await;
    cluster.shutdown().await;
}

#[tokio::test]
async fn four_replicas_over_tcp() {
    let addrs = loopback_addrs(4).unwrap();
    let cluster = Cluster::start(addrs, Arc::new(TcpTransport::default()), Cluster::test_options(10))
        .await
        .unwrap();
    single_message_round_trip(&cluster).await;
    cluster.shutdown().await;
}

#[tokio::test]
async fn every_replica_applies_in_order() {
    let cluster = memory_cluster(7, 3).await;
    let mut feeds: Vec<_> = cluster.nodes.iter().map(ChainNode::subscribe_operations).collect();
    let mut acks = cluster.head().acks().unwrap();

    const N: i64 = 200;
    let head = cluster.head().clone();
    let producer = tokio::spawn(async move {
        for id in 0..N {
            head.submit(ChainMessage::new(id, format!("op {}", id))).await?;
        }
        Ok::<_, Error>(())
    });

    let mut acked = HashSet::new();
    for _ in 0..N {
        let ack = timeout(LIMIT, acks.recv()).await.unwrap().unwrap();
        assert!(acked.insert(ack.id), "duplicate ack {}", ack.id);
    }
    producer.await.unwrap().unwrap();
    assert_eq!(acked.len() as i64, N);

    for feed in &mut feeds {
        for id in 0..N {
            assert_eq!(feed.recv().await.unwrap().id, id);
        }
    }
    cluster.shutdown().await;
}

#[tokio::test]
async fn undrained_acks_stall_without_loss() {
    let capacity = 2;
    let cluster = memory_cluster(4, capacity).await;
    let mut committed = cluster.tail().subscribe_operations();

    // Nobody drains the head's acks, so the chain fills up and the
    // producer eventually blocks.
    let head = cluster.head().clone();
    let producer = tokio::spawn(async move {
        let mut sent = 0i64;
        while head.submit(ChainMessage::new(sent, "x")).await.is_ok() {
            sent += 1;
        }
        sent
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!producer.is_finished(), "producer should be blocked");

    // Draining resumes the flow; nothing submitted so far is lost.
    let mut acks = cluster.head().acks().unwrap();
    for id in 0..50 {
        let ack = timeout(LIMIT, acks.recv()).await.unwrap().unwrap();
        assert_eq!(ack.id, id);
    }
    for id in 0..50 {
        assert_eq!(committed.recv().await.unwrap().id, id);
    }

    cluster.shutdown().await;
    let sent = producer.await.unwrap();
    assert!(sent >= 50);
}

#[tokio::test]
async fn one_relay_per_link() {
    let cluster = memory_cluster(4, 4).await;
    let mut acks = cluster.head().acks().unwrap();

    let head = cluster.head().clone();
    let producer = tokio::spawn(async move {
        for id in 0..100 {
            head.submit(ChainMessage::new(id, "x")).await?;
        }
        Ok::<_, Error>(())
    });
    for _ in 0..100 {
        timeout(LIMIT, acks.recv()).await.unwrap().unwrap();
    }
    producer.await.unwrap().unwrap();

    for node in &cluster.nodes[1..] {
        assert_eq!(node.relays_spawned(), 1);
        assert_eq!(node.active_relays(), 1);
    }
    assert_eq!(cluster.head().relays_spawned(), 0);

    cluster.shutdown().await;
    for node in &cluster.nodes {
        assert_eq!(node.active_relays(), 0);
        assert_eq!(node.phase(), Phase::Closed);
    }
}

#[tokio::test]
async fn shutdown_releases_blocked_tasks() {
    let cluster = memory_cluster(4, 1).await;
    let mut acks = cluster.head().acks().unwrap();

    let head = cluster.head().clone();
    let producer = tokio::spawn(async move {
        let mut id = 0;
        loop {
            if let Err(e) = head.submit(ChainMessage::new(id, "x")).await {
                return e;
            }
            id += 1;
        }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    timeout(LIMIT, cluster.shutdown()).await.unwrap();
    assert!(matches!(producer.await.unwrap(), Error::QueueClosed));

    // The ack stream reports the closed queue too.
    let closed = timeout(LIMIT, async {
        loop {
            if let Err(e) = acks.recv().await {
                return e;
            }
        }
    })
    .await
    .unwrap();
    assert!(matches!(closed, Error::QueueClosed));
}

#[tokio::test]
async fn successor_restart_is_repaired_by_relink() {
    let mut cluster = memory_cluster(4, 10).await;
    let mut acks = cluster.head().acks().unwrap();

    let third = cluster.nodes[2].clone();
    let stop = CancellationToken::new();
    let supervisor = tokio::spawn(supervise(
        third.clone(),
        third.faults().unwrap(),
        RelinkPolicy {
            initial_backoff: Duration::from_millis(20),
            ..RelinkPolicy::default()
        },
        stop.clone(),
    ));

    cluster.head().submit(ChainMessage::new(1, "before")).await.unwrap();
    assert_eq!(timeout(LIMIT, acks.recv()).await.unwrap().unwrap().id, 1);

    // Restart the tail.
    cluster.tail().shutdown().await;
    timeout(LIMIT, third.wait_for(|s| s.phase == Phase::Linking)).await.unwrap();

    let tail = cluster.replica(3).unwrap();
    let mut committed = tail.subscribe_operations();
    tail.start().await.unwrap();
    let last = cluster.nodes.len() - 1;
    cluster.nodes[last] = tail;

    timeout(LIMIT, third.wait_for(|s| s.has_successor && s.generation == 2))
        .await
        .unwrap();

    cluster.head().submit(ChainMessage::new(2, "after")).await.unwrap();
    assert_eq!(timeout(LIMIT, committed.recv()).await.unwrap().unwrap().id, 2);
    assert_eq!(timeout(LIMIT, acks.recv()).await.unwrap().unwrap().id, 2);

    stop.cancel();
    supervisor.await.unwrap();
    cluster.shutdown().await;
}

#[tokio::test]
async fn stale_predecessor_link_is_replaced_over_tcp() {
    let transport = Arc::new(TcpTransport::default());
    let cluster = Cluster::build(loopback_addrs(4).unwrap(), transport.clone(), Cluster::test_options(10)).unwrap();
    let third = cluster.nodes[2].clone();
    cluster.tail().start().await.unwrap();
    third.start().await.unwrap();

    // A leftover connection nobody writes to is being served by the third
    // replica when the second one comes up.
    let stale = transport.dial(&cluster.addrs[2], LIMIT).await.unwrap();
    timeout(LIMIT, async {
        while third.relays_spawned() < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let second = cluster.nodes[1].clone();
    let stop = CancellationToken::new();
    let supervisor = tokio::spawn(supervise(
        second.clone(),
        second.faults().unwrap(),
        RelinkPolicy {
            initial_backoff: Duration::from_millis(20),
            ..RelinkPolicy::default()
        },
        stop.clone(),
    ));
    second.start().await.unwrap();
    cluster.head().start().await.unwrap();

    let mut committed = cluster.tail().subscribe_operations();
    let mut acks = cluster.head().acks().unwrap();
    const N: i64 = 200;
    let head = cluster.head().clone();
    let producer = tokio::spawn(async move {
        for id in 0..N {
            head.submit(ChainMessage::new(id, "x")).await?;
        }
        Ok::<_, Error>(())
    });

    for id in 0..N {
        assert_eq!(timeout(LIMIT, acks.recv()).await.unwrap().unwrap().id, id);
    }
    producer.await.unwrap().unwrap();
    for id in 0..N {
        assert_eq!(committed.recv().await.unwrap().id, id);
    }

    // The second replica linked once and never had to relink.
    assert_eq!(second.link_state().snapshot().generation, 1);
    assert_eq!(third.relays_spawned(), 2);
    assert_eq!(third.active_relays(), 1);

    // Dropping the stale connection leaves the live link alone.
    drop(stale);
    cluster.head().submit(ChainMessage::new(N, "after")).await.unwrap();
    assert_eq!(timeout(LIMIT, acks.recv()).await.unwrap().unwrap().id, N);
    assert_eq!(second.link_state().snapshot().generation, 1);

    stop.cancel();
    supervisor.await.unwrap();
    cluster.shutdown().await;
}

#[tokio::test]
async fn dead_tail_is_detected_with_full_ack_queues() {
    let cluster = memory_cluster(4, 1).await;
    let third = cluster.nodes[2].clone();

    // Head acks are never drained, so the ack queues fill behind the tail.
    let head = cluster.head().clone();
    let producer = tokio::spawn(async move {
        let mut id = 0;
        while head.submit(ChainMessage::new(id, "x")).await.is_ok() {
            id += 1;
        }
    });
    tokio::time::sleep(Duration::from_millis(200)).await;

    cluster.tail().shutdown().await;
    timeout(Duration::from_secs(5), third.wait_for(|s| s.phase == Phase::Linking))
        .await
        .unwrap();
    assert!(!third.has_successor());

    cluster.shutdown().await;
    producer.await.unwrap();
}
