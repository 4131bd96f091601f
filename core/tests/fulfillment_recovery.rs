//! Crash and failure recovery: pending entries replay after a worker dies,
//! transient durable failures retry, malformed entries never wedge the log.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use hotdrop_core::{
    CacheClient, CacheConfig, Clock, CoordinationStore, FulfillmentConfig, FulfillmentPool,
    RequestContext, ReservationEngine, UserId, Voucher, VoucherId,
};
use hotdrop_testing::{InMemoryCoordinationStore, InMemoryDurableStore, ManualClock};
use std::sync::Arc;
use std::time::Duration;

type Engine = ReservationEngine<InMemoryCoordinationStore, InMemoryDurableStore>;

fn harness() -> (
    Arc<InMemoryCoordinationStore>,
    Arc<InMemoryDurableStore>,
    Arc<ManualClock>,
    Engine,
) {
    hotdrop_testing::init_tracing();
    let clock = Arc::new(ManualClock::default());
    let store = Arc::new(InMemoryCoordinationStore::with_clock(Arc::clone(&clock)));
    let durable = Arc::new(InMemoryDurableStore::new());
    let cache = Arc::new(CacheClient::new(
        Arc::clone(&store),
        Arc::clone(&clock) as Arc<dyn Clock>,
        CacheConfig::default(),
    ));
    let engine = ReservationEngine::new(
        Arc::clone(&store),
        Arc::clone(&durable),
        cache,
        Arc::clone(&clock) as Arc<dyn Clock>,
        &CacheConfig::default(),
    );
    (store, durable, clock, engine)
}

fn pool_config() -> FulfillmentConfig {
    FulfillmentConfig {
        workers: 1,
        block_timeout: Duration::from_millis(50),
        recovery_backoff: Duration::from_millis(20),
        ..FulfillmentConfig::default()
    }
}

async fn open_sale(engine: &Engine, durable: &InMemoryDurableStore, clock: &ManualClock, stock: u32) -> Voucher {
    let now = clock.now();
    let voucher = Voucher {
        id: VoucherId::new(21),
        stock,
        begin_time: now - Duration::from_secs(3600),
        end_time: now + Duration::from_secs(3600),
    };
    durable.put_voucher(voucher.clone());
    engine.open_sale(&voucher).await.unwrap();
    voucher
}

async fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

async fn start_pool(
    store: &Arc<InMemoryCoordinationStore>,
    durable: &Arc<InMemoryDurableStore>,
    clock: &Arc<ManualClock>,
) -> FulfillmentPool {
    FulfillmentPool::start(
        Arc::clone(store),
        Arc::clone(durable),
        Arc::clone(clock) as Arc<dyn Clock>,
        pool_config(),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn crashed_deliveries_replay_on_restart() {
    let (store, durable, clock, engine) = harness();
    let voucher = open_sale(&engine, &durable, &clock, 1).await;
    let buyer = RequestContext::new(UserId::new(5));
    let outcome = engine.attempt_purchase(&buyer, voucher.id).await.unwrap();
    assert!(outcome.is_confirmed());

    // A worker that read the entry and died before acknowledging leaves it
    // on its pending list.
    let config = pool_config();
    store.ensure_group(&config.group).await.unwrap();
    let crashed_consumer = format!("{}-0", config.consumer_prefix);
    let delivery = store
        .read_new(&config.group, &crashed_consumer, Duration::from_millis(50))
        .await
        .unwrap()
        .expect("entry delivered to the doomed worker");
    assert_eq!(delivery.message.user_id, buyer.user_id);
    assert_eq!(store.pending_count(&config.group), 1);

    // The restarted pool reuses the consumer name and catches up first.
    let pool = start_pool(&store, &durable, &clock).await;
    let observed = Arc::clone(&durable);
    assert!(
        wait_until(move || observed.order_count() == 1).await,
        "timed out waiting for the replay"
    );
    let observed = Arc::clone(&store);
    let group = config.group.clone();
    assert!(
        wait_until(move || observed.pending_count(&group) == 0).await,
        "timed out waiting for the acknowledgement"
    );
    assert_eq!(durable.order_count(), 1, "replay materializes exactly once");

    pool.shutdown().await;
}

#[tokio::test]
async fn transient_decrement_failures_retry_until_persisted() {
    let (store, durable, clock, engine) = harness();
    let voucher = open_sale(&engine, &durable, &clock, 1).await;
    durable.fail_next_decrements(2);

    let buyer = RequestContext::new(UserId::new(6));
    let outcome = engine.attempt_purchase(&buyer, voucher.id).await.unwrap();
    assert!(outcome.is_confirmed());

    let pool = start_pool(&store, &durable, &clock).await;
    let observed = Arc::clone(&durable);
    assert!(
        wait_until(move || observed.order_count() == 1).await,
        "timed out waiting for the retries"
    );
    assert_eq!(durable.stock_of(voucher.id), Some(0));

    pool.shutdown().await;
}

#[tokio::test]
async fn insert_failures_undersell_but_never_oversell() {
    let (store, durable, clock, engine) = harness();
    let voucher = open_sale(&engine, &durable, &clock, 3).await;
    // Each failed insert happens after a successful decrement, so every
    // retry burns a unit of durable stock. The order still lands exactly
    // once.
    durable.fail_next_inserts(2);

    let buyer = RequestContext::new(UserId::new(7));
    let outcome = engine.attempt_purchase(&buyer, voucher.id).await.unwrap();
    assert!(outcome.is_confirmed());

    let pool = start_pool(&store, &durable, &clock).await;
    let observed = Arc::clone(&durable);
    assert!(
        wait_until(move || observed.order_count() == 1).await,
        "timed out waiting for the retries"
    );
    assert_eq!(durable.order_count(), 1);
    assert_eq!(durable.stock_of(voucher.id), Some(0));

    pool.shutdown().await;
}

#[tokio::test]
async fn a_malformed_entry_ahead_of_real_work_is_dropped() {
    let (store, durable, clock, engine) = harness();
    let voucher = open_sale(&engine, &durable, &clock, 1).await;

    // The malformed entry sits in front of the reservation in log order.
    store.append_malformed();
    let buyer = RequestContext::new(UserId::new(8));
    let outcome = engine.attempt_purchase(&buyer, voucher.id).await.unwrap();
    assert!(outcome.is_confirmed());
    assert_eq!(store.log_len(), 2);

    let pool = start_pool(&store, &durable, &clock).await;
    let observed = Arc::clone(&durable);
    assert!(
        wait_until(move || observed.order_count() == 1).await,
        "timed out waiting for fulfillment behind the bad entry"
    );
    let observed = Arc::clone(&store);
    let group = pool_config().group;
    assert!(
        wait_until(move || observed.pending_count(&group) == 0).await,
        "the malformed entry must be acknowledged away"
    );

    pool.shutdown().await;
}

#[tokio::test]
async fn an_idle_pool_shuts_down_promptly() {
    let (store, durable, clock, _engine) = harness();
    let pool = start_pool(&store, &durable, &clock).await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    let done = tokio::time::timeout(Duration::from_secs(5), pool.shutdown()).await;
    assert!(done.is_ok(), "shutdown must interrupt blocking reads");
}
