//! Concurrency checks on the order ID generator.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use futures::future::join_all;
use hotdrop_core::{Clock, IdGenerator, SystemClock};
use hotdrop_testing::{InMemoryCoordinationStore, ManualClock};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_allocations_never_collide() {
    let store = Arc::new(InMemoryCoordinationStore::new());
    let ids = Arc::new(IdGenerator::new(
        Arc::clone(&store),
        Arc::new(SystemClock) as Arc<dyn Clock>,
    ));

    let tasks: Vec<_> = (0..10_000)
        .map(|_| {
            let ids = Arc::clone(&ids);
            tokio::spawn(async move { ids.next_id("order").await })
        })
        .collect();
    let minted: HashSet<u64> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked").expect("allocation failed"))
        .collect();

    assert_eq!(minted.len(), 10_000, "every allocation must be distinct");
}

#[tokio::test]
async fn later_seconds_always_outrank_earlier_bursts() {
    let clock = Arc::new(ManualClock::default());
    let store = Arc::new(InMemoryCoordinationStore::with_clock(Arc::clone(&clock)));
    let ids = IdGenerator::new(Arc::clone(&store), Arc::clone(&clock) as Arc<dyn Clock>);

    let mut burst = Vec::new();
    for _ in 0..100 {
        burst.push(ids.next_id("order").await.unwrap());
    }
    clock.advance(Duration::from_secs(1));
    let later = ids.next_id("order").await.unwrap();

    let burst_max = burst.iter().max().copied().unwrap();
    assert!(
        later > burst_max,
        "timestamp bits dominate the sequence bits"
    );
}
