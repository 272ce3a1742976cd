use std::sync::Arc;
use std::time::Duration;

use quorum_queue::{ClientId, ConcurrentFanOut, Extend, InMemoryNode, Lock, Queue};
use tokio::sync::Barrier;

fn nodes(n: usize) -> Vec<Arc<InMemoryNode>> {
    (0..n).map(|_| Arc::new(InMemoryNode::new())).collect()
}

/// Many clients race for the same path at once; at most one majority lock
/// should be granted.
#[tokio::test]
async fn only_one_client_wins_a_concurrent_lock_race() {
    let shared_nodes = nodes(5);
    let attempts = 10usize;
    let barrier = Arc::new(Barrier::new(attempts));
    let mut handles = Vec::new();

    for i in 0..attempts {
        let shared_nodes = shared_nodes.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            let lock = Lock::new(
                shared_nodes,
                5,
                Duration::from_secs(5),
                Duration::ZERO,
                ClientId(i as u64),
                ConcurrentFanOut,
            )
            .unwrap();
            barrier.wait().await;
            lock.lock("contested-path", Extend::No).await.is_some()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

/// A minority of nodes being unreachable should not prevent acquisition.
#[tokio::test]
async fn lock_tolerates_a_minority_of_unreachable_nodes() {
    let all_nodes = nodes(5);
    // Simulate two unreachable nodes by only connecting to three of five.
    let reachable = all_nodes[..3].to_vec();

    let lock = Lock::new(
        reachable,
        5,
        Duration::from_secs(5),
        Duration::ZERO,
        ClientId(1),
        ConcurrentFanOut,
    )
    .unwrap();

    assert!(lock.lock("p", Extend::No).await.is_some());
}

/// Construction itself must refuse an ensemble with no possible majority.
#[tokio::test]
async fn lock_construction_fails_without_enough_connected_nodes() {
    let reachable = nodes(2);
    let result = Lock::new(
        reachable,
        5,
        Duration::from_secs(5),
        Duration::ZERO,
        ClientId(1),
        ConcurrentFanOut,
    );
    assert!(result.is_err());
}

/// Concurrent `get` calls against one queued item hand it to exactly one
/// caller; the rest see an empty queue.
#[tokio::test]
async fn concurrent_get_calls_hand_out_each_item_exactly_once() {
    let shared_nodes = nodes(3);
    let producer = Queue::new(
        "work",
        shared_nodes.clone(),
        3,
        Duration::from_secs(5),
        Duration::ZERO,
        ClientId(0),
        1,
        ConcurrentFanOut,
    )
    .unwrap();
    producer.put("task-a", 100).await;
    producer.put("task-b", 100).await;

    let attempts = 6usize;
    let barrier = Arc::new(Barrier::new(attempts));
    let mut handles = Vec::new();
    for i in 0..attempts {
        let shared_nodes = shared_nodes.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            let consumer = Queue::new(
                "work",
                shared_nodes,
                3,
                Duration::from_secs(5),
                Duration::ZERO,
                ClientId((i + 1) as u64),
                (i + 1) as u64 * 7,
                ConcurrentFanOut,
            )
            .unwrap();
            barrier.wait().await;
            consumer.get(false, true).await
        }));
    }

    let mut claimed = Vec::new();
    for handle in handles {
        if let Some((payload, _handle)) = handle.await.unwrap() {
            claimed.push(payload);
        }
    }
    claimed.sort();
    assert_eq!(claimed, vec!["task-a".to_string(), "task-b".to_string()]);
}

/// A lease that is never extended and never consumed lapses on its own,
/// without any node needing an explicit release call.
///
/// Node-side expiry is governed by real wall-clock seconds (an
/// [`InMemoryNode`] stands in for a real store's own TTL), so this test
/// uses a genuinely short timeout and a real sleep rather than
/// `tokio::time::pause` (advancing only the runtime's virtual clock
/// would not lapse the lease).
#[tokio::test]
async fn an_unextended_lease_expires_and_becomes_available_again() {
    let shared_nodes = nodes(3);
    let holder = Lock::new(
        shared_nodes.clone(),
        3,
        Duration::from_secs(1),
        Duration::ZERO,
        ClientId(1),
        ConcurrentFanOut,
    )
    .unwrap();
    assert!(holder.lock("p", Extend::No).await.is_some());

    tokio::time::sleep(Duration::from_millis(1200)).await;

    let other = Lock::new(
        shared_nodes,
        3,
        Duration::from_secs(1),
        Duration::ZERO,
        ClientId(2),
        ConcurrentFanOut,
    )
    .unwrap();
    assert!(other.lock("p", Extend::No).await.is_some());
}

/// A queue item's background extender keeps it alive past its original
/// timeout, as long as the holder never explicitly releases it.
#[tokio::test]
async fn background_extender_keeps_an_item_alive_past_its_original_timeout() {
    let shared_nodes = nodes(3);
    let q = Queue::new(
        "work",
        shared_nodes,
        3,
        Duration::from_secs(1),
        Duration::ZERO,
        ClientId(1),
        99,
        ConcurrentFanOut,
    )
    .unwrap();
    q.put("long-task", 100).await;
    let (_payload, handle) = q.get(true, true).await.expect("claims the item");

    // Without renewal the 1-second lease would have lapsed by now; the
    // background extender (firing every polling_interval = 200ms) should
    // have kept it alive.
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let pct = q.consume(&handle).await.expect("still owned thanks to the extender");
    assert_eq!(pct, 100.0);
}
