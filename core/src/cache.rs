//! Read-through caching with penetration and breakdown defenses.
//!
//! Three read policies over the coordination store's key/value surface, all
//! generic over the cached type and a `load` callback that reaches durable
//! storage:
//!
//! - [`get_with_passthrough`](CacheClient::get_with_passthrough): plain
//!   read-through with null-caching. A confirmed-missing entity is
//!   remembered with a short-lived empty sentinel, so repeated lookups of
//!   nonsense IDs do not hammer durable storage.
//! - [`get_with_mutex`](CacheClient::get_with_mutex): misses rebuild under a
//!   per-key distributed lock. Losers sleep briefly and retry, so one miss
//!   storm issues exactly one `load`.
//! - [`get_with_logical_expiry`](CacheClient::get_with_logical_expiry):
//!   entries carry a `logical_expire_at` instant instead of a physical TTL.
//!   Reads past that instant return the stale value immediately and hand the
//!   rebuild to a bounded background pool; a saturated pool drops the
//!   rebuild and the stale value keeps serving. Intended for pre-warmed hot
//!   keys, see [`set_with_logical_expiry`](CacheClient::set_with_logical_expiry).
//!
//! Values are stored as JSON. The missing sentinel is the empty string,
//! which no serialized value can collide with.

use crate::clock::Clock;
use crate::config::CacheConfig;
use crate::error::Result;
use crate::keys;
use crate::lock::{DistributedLock, LockToken};
use crate::store::CoordinationStore;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const NULL_SENTINEL: &str = "";

/// Stored form of a logically-expiring entry.
#[derive(Serialize, Deserialize)]
struct LogicalEnvelope<T> {
    data: T,
    logical_expire_at: DateTime<Utc>,
}

enum CacheRead<T> {
    Hit(T),
    ConfirmedMissing,
    Miss,
}

type RebuildJob = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Fixed worker pool executing cache rebuilds off the read path.
struct RebuildPool {
    queue: mpsc::Sender<(String, RebuildJob)>,
}

impl RebuildPool {
    fn start(workers: usize, queue_depth: usize) -> Self {
        let (queue, receiver) = mpsc::channel(queue_depth.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        for worker in 0..workers.max(1) {
            let receiver = Arc::clone(&receiver);
            tokio::spawn(async move {
                loop {
                    let next = receiver.lock().await.recv().await;
                    let Some((key, job)) = next else { break };
                    if let Err(error) = job.await {
                        tracing::warn!(worker, key = %key, error = %error, "Cache rebuild failed");
                    }
                }
            });
        }
        Self { queue }
    }

    /// Try to enqueue a rebuild; `false` means the pool is saturated.
    fn try_submit(&self, key: &str, job: RebuildJob) -> bool {
        self.queue.try_send((key.to_owned(), job)).is_ok()
    }
}

/// Read-through cache over the coordination store.
pub struct CacheClient<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    lock: DistributedLock<S>,
    rebuilds: RebuildPool,
    config: CacheConfig,
}

impl<S: CoordinationStore + 'static> CacheClient<S> {
    /// Cache over `store`. Spawns the rebuild pool, so a Tokio runtime must
    /// be running.
    #[must_use]
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, config: CacheConfig) -> Self {
        let rebuilds = RebuildPool::start(config.rebuild_workers, config.rebuild_queue_depth);
        let lock = DistributedLock::new(Arc::clone(&store));
        Self {
            store,
            clock,
            lock,
            rebuilds,
            config,
        }
    }

    /// Read `prefix + id`, loading and caching on miss.
    ///
    /// A `load` that returns `None` writes a short-lived sentinel, so the
    /// missing entity is not re-queried until the sentinel expires.
    ///
    /// # Errors
    ///
    /// Store and serialization failures; `load` errors pass through.
    pub async fn get_with_passthrough<T, I, F, Fut>(
        &self,
        prefix: &str,
        id: I,
        ttl: Duration,
        load: F,
    ) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        I: Display + Copy,
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        let key = keys::cache_key(prefix, id);
        match self.read(&key).await? {
            CacheRead::Hit(value) => {
                metrics::counter!("cache.reads", "policy" => "passthrough", "result" => "hit")
                    .increment(1);
                Ok(Some(value))
            }
            CacheRead::ConfirmedMissing => {
                metrics::counter!("cache.reads", "policy" => "passthrough", "result" => "sentinel")
                    .increment(1);
                Ok(None)
            }
            CacheRead::Miss => {
                metrics::counter!("cache.reads", "policy" => "passthrough", "result" => "miss")
                    .increment(1);
                let loaded = load(id).await?;
                self.store_loaded(&key, loaded.as_ref(), ttl).await?;
                Ok(loaded)
            }
        }
    }

    /// Read `prefix + id`; misses rebuild under a per-key lock, so
    /// concurrent misses call `load` exactly once.
    ///
    /// Callers that lose the lock sleep `mutex_retry_interval` and retry the
    /// whole read. The winner re-checks the cache before loading, since the
    /// previous holder may have already rebuilt the entry.
    ///
    /// # Errors
    ///
    /// Store and serialization failures; `load` errors pass through (the
    /// lock is still released).
    pub async fn get_with_mutex<T, I, F, Fut>(
        &self,
        prefix: &str,
        id: I,
        ttl: Duration,
        load: F,
    ) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        I: Display + Copy,
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        let key = keys::cache_key(prefix, id);
        let lock_key = keys::rebuild_lock_key(&key);
        loop {
            match self.read(&key).await? {
                CacheRead::Hit(value) => return Ok(Some(value)),
                CacheRead::ConfirmedMissing => return Ok(None),
                CacheRead::Miss => {}
            }
            let Some(token) = self
                .lock
                .try_acquire(&lock_key, self.config.rebuild_lock_lease)
                .await?
            else {
                tokio::time::sleep(self.config.mutex_retry_interval).await;
                continue;
            };
            let result = self.rebuild_under_lock(&key, id, ttl, &load).await;
            if let Err(error) = self.lock.release(&lock_key, &token).await {
                tracing::warn!(key = %key, error = %error, "Failed to release rebuild lock");
            }
            return result;
        }
    }

    async fn rebuild_under_lock<T, I, F, Fut>(
        &self,
        key: &str,
        id: I,
        ttl: Duration,
        load: &F,
    ) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        I: Display + Copy,
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        // Double check: the previous holder may have rebuilt the entry
        // between our miss and our acquisition.
        match self.read(key).await? {
            CacheRead::Hit(value) => return Ok(Some(value)),
            CacheRead::ConfirmedMissing => return Ok(None),
            CacheRead::Miss => {}
        }
        metrics::counter!("cache.reads", "policy" => "mutex", "result" => "rebuild").increment(1);
        let loaded = load(id).await?;
        self.store_loaded(key, loaded.as_ref(), ttl).await?;
        Ok(loaded)
    }

    /// Read a pre-warmed `prefix + id` entry, serving stale data while a
    /// background rebuild runs.
    ///
    /// Cold keys return `None` without calling `load`: entries enter this
    /// policy through [`set_with_logical_expiry`](Self::set_with_logical_expiry).
    /// A stale read tries the per-key rebuild lock; the winner hands `load`
    /// to the rebuild pool and still returns the stale value, so readers
    /// never wait on a rebuild. A saturated pool drops the submission and
    /// surrenders the lock.
    ///
    /// # Errors
    ///
    /// Store and serialization failures. Rebuild failures are logged by the
    /// pool, never surfaced to readers.
    pub async fn get_with_logical_expiry<T, I, F, Fut>(
        &self,
        prefix: &str,
        id: I,
        freshness: Duration,
        load: F,
    ) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        I: Display + Copy + Send + 'static,
        F: FnOnce(I) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<T>>> + Send + 'static,
    {
        let key = keys::cache_key(prefix, id);
        let Some(raw) = self.store.get(&key).await? else {
            metrics::counter!("cache.reads", "policy" => "logical", "result" => "cold")
                .increment(1);
            return Ok(None);
        };
        if raw == NULL_SENTINEL {
            return Ok(None);
        }
        let envelope: LogicalEnvelope<T> = serde_json::from_str(&raw)?;
        if envelope.logical_expire_at > self.clock.now() {
            metrics::counter!("cache.reads", "policy" => "logical", "result" => "fresh")
                .increment(1);
            return Ok(Some(envelope.data));
        }
        metrics::counter!("cache.reads", "policy" => "logical", "result" => "stale").increment(1);
        let lock_key = keys::rebuild_lock_key(&key);
        if let Some(token) = self
            .lock
            .try_acquire(&lock_key, self.config.rebuild_lock_lease)
            .await?
        {
            self.submit_rebuild(key, id, freshness, lock_key, token, load)
                .await;
        }
        Ok(Some(envelope.data))
    }

    /// Write `prefix + id` with a physical TTL.
    ///
    /// # Errors
    ///
    /// Store and serialization failures.
    pub async fn set<T, I>(&self, prefix: &str, id: I, value: &T, ttl: Duration) -> Result<()>
    where
        T: Serialize,
        I: Display,
    {
        let key = keys::cache_key(prefix, id);
        self.store
            .set(&key, &serde_json::to_string(value)?, Some(ttl))
            .await
    }

    /// Pre-warm `prefix + id` for the logical-expiry policy.
    ///
    /// The entry gets no physical TTL; `freshness` sets `logical_expire_at`.
    ///
    /// # Errors
    ///
    /// Store and serialization failures.
    pub async fn set_with_logical_expiry<T, I>(
        &self,
        prefix: &str,
        id: I,
        value: &T,
        freshness: Duration,
    ) -> Result<()>
    where
        T: Serialize,
        I: Display,
    {
        let key = keys::cache_key(prefix, id);
        let envelope = LogicalEnvelope {
            data: value,
            logical_expire_at: self.clock.now() + freshness,
        };
        self.store
            .set(&key, &serde_json::to_string(&envelope)?, None)
            .await
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<CacheRead<T>> {
        match self.store.get(key).await? {
            None => Ok(CacheRead::Miss),
            Some(raw) if raw == NULL_SENTINEL => Ok(CacheRead::ConfirmedMissing),
            Some(raw) => Ok(CacheRead::Hit(serde_json::from_str(&raw)?)),
        }
    }

    async fn store_loaded<T: Serialize>(
        &self,
        key: &str,
        loaded: Option<&T>,
        ttl: Duration,
    ) -> Result<()> {
        match loaded {
            Some(value) => {
                self.store
                    .set(key, &serde_json::to_string(value)?, Some(ttl))
                    .await
            }
            None => {
                self.store
                    .set(key, NULL_SENTINEL, Some(self.config.null_ttl))
                    .await
            }
        }
    }

    async fn submit_rebuild<T, I, F, Fut>(
        &self,
        key: String,
        id: I,
        freshness: Duration,
        lock_key: String,
        token: LockToken,
        load: F,
    ) where
        T: Serialize + Send + 'static,
        I: Send + 'static,
        F: FnOnce(I) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<T>>> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let clock = Arc::clone(&self.clock);
        let lock = DistributedLock::new(Arc::clone(&self.store));
        let queue_key = key.clone();
        let surrender_key = lock_key.clone();
        let surrender_token = token.clone();
        let job: RebuildJob = Box::pin(async move {
            let outcome = rebuild_entry(&store, &clock, &key, id, freshness, load).await;
            if let Err(error) = lock.release(&lock_key, &token).await {
                tracing::warn!(key = %key, error = %error, "Failed to release rebuild lock");
            }
            outcome
        });
        if !self.rebuilds.try_submit(&queue_key, job) {
            metrics::counter!("cache.rebuilds_dropped").increment(1);
            tracing::warn!(key = %queue_key, "Rebuild pool saturated, dropping rebuild");
            // Surrender the lock so the next stale read can try again.
            if let Err(error) = self.lock.release(&surrender_key, &surrender_token).await {
                tracing::warn!(key = %queue_key, error = %error, "Failed to release rebuild lock");
            }
        }
    }
}

async fn rebuild_entry<S, T, I, F, Fut>(
    store: &Arc<S>,
    clock: &Arc<dyn Clock>,
    key: &str,
    id: I,
    freshness: Duration,
    load: F,
) -> Result<()>
where
    S: CoordinationStore,
    T: Serialize,
    F: FnOnce(I) -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    match load(id).await? {
        Some(value) => {
            let envelope = LogicalEnvelope {
                data: value,
                logical_expire_at: clock.now() + freshness,
            };
            store
                .set(key, &serde_json::to_string(&envelope)?, None)
                .await
        }
        // The backing entity vanished; drop the key back to a cold miss.
        None => store.delete(key).await,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use crate::{InMemoryCoordinationStore, ManualClock};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct Snapshot {
        name: String,
    }

    fn snapshot(name: &str) -> Snapshot {
        Snapshot {
            name: name.to_string(),
        }
    }

    fn test_config() -> CacheConfig {
        CacheConfig {
            value_ttl: Duration::from_secs(600),
            null_ttl: Duration::from_secs(120),
            rebuild_lock_lease: Duration::from_secs(10),
            mutex_retry_interval: Duration::from_millis(5),
            rebuild_workers: 2,
            rebuild_queue_depth: 8,
        }
    }

    fn fixture_with(
        config: CacheConfig,
    ) -> (
        Arc<CacheClient<InMemoryCoordinationStore>>,
        Arc<InMemoryCoordinationStore>,
        Arc<ManualClock>,
    ) {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(InMemoryCoordinationStore::with_clock(Arc::clone(&clock)));
        let cache = Arc::new(CacheClient::new(
            Arc::clone(&store),
            clock.clone() as Arc<dyn Clock>,
            config,
        ));
        (cache, store, clock)
    }

    fn fixture() -> (
        Arc<CacheClient<InMemoryCoordinationStore>>,
        Arc<InMemoryCoordinationStore>,
        Arc<ManualClock>,
    ) {
        fixture_with(test_config())
    }

    #[tokio::test]
    async fn passthrough_loads_once_then_serves_from_cache() {
        let (cache, _store, _clock) = fixture();
        let loads = Arc::new(AtomicUsize::new(0));
        let loader = {
            let loads = Arc::clone(&loads);
            move |id: u64| {
                let loads = Arc::clone(&loads);
                async move {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok(Some(Snapshot {
                        name: format!("v{id}"),
                    }))
                }
            }
        };

        let ttl = Duration::from_secs(60);
        let first: Option<Snapshot> = cache
            .get_with_passthrough("test:", 1u64, ttl, &loader)
            .await
            .unwrap();
        let second: Option<Snapshot> = cache
            .get_with_passthrough("test:", 1u64, ttl, &loader)
            .await
            .unwrap();

        assert_eq!(first, Some(snapshot("v1")));
        assert_eq!(second, Some(snapshot("v1")));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn passthrough_remembers_missing_entities_until_the_sentinel_expires() {
        let (cache, _store, clock) = fixture();
        let loads = Arc::new(AtomicUsize::new(0));
        let loader = {
            let loads = Arc::clone(&loads);
            move |_id: u64| {
                let loads = Arc::clone(&loads);
                async move {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok(None::<Snapshot>)
                }
            }
        };

        let ttl = Duration::from_secs(60);
        assert_eq!(
            cache
                .get_with_passthrough::<Snapshot, _, _, _>("test:", 404u64, ttl, &loader)
                .await
                .unwrap(),
            None
        );
        assert_eq!(
            cache
                .get_with_passthrough::<Snapshot, _, _, _>("test:", 404u64, ttl, &loader)
                .await
                .unwrap(),
            None
        );
        // The sentinel absorbed the second lookup.
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(121));
        cache
            .get_with_passthrough::<Snapshot, _, _, _>("test:", 404u64, ttl, &loader)
            .await
            .unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn mutex_rebuild_loads_once_under_a_miss_storm() {
        let (cache, _store, _clock) = fixture();
        let loads = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = Arc::clone(&cache);
            let loads = Arc::clone(&loads);
            handles.push(tokio::spawn(async move {
                cache
                    .get_with_mutex("test:", 7u64, Duration::from_secs(60), move |id| {
                        let loads = Arc::clone(&loads);
                        async move {
                            loads.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok(Some(Snapshot {
                                name: format!("v{id}"),
                            }))
                        }
                    })
                    .await
                    .unwrap()
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Some(snapshot("v7")));
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn mutex_releases_the_lock_when_the_loader_fails() {
        let (cache, _store, _clock) = fixture();
        let failing = |_id: u64| async move {
            Err::<Option<Snapshot>, _>(crate::error::Error::Storage("down".into()))
        };
        let ttl = Duration::from_secs(60);
        assert!(cache
            .get_with_mutex::<Snapshot, _, _, _>("test:", 7u64, ttl, failing)
            .await
            .is_err());

        // The lock was surrendered, so a healthy retry rebuilds.
        let recovered = cache
            .get_with_mutex("test:", 7u64, ttl, |_id: u64| async move {
                Ok(Some(snapshot("ok")))
            })
            .await
            .unwrap();
        assert_eq!(recovered, Some(snapshot("ok")));
    }

    #[tokio::test]
    async fn logical_expiry_serves_stale_while_the_rebuild_runs() {
        let (cache, _store, clock) = fixture();
        let freshness = Duration::from_secs(60);
        cache
            .set_with_logical_expiry("test:", 9u64, &snapshot("old"), freshness)
            .await
            .unwrap();
        clock.advance(Duration::from_secs(120));

        let gate = Arc::new(Notify::new());
        let loads = Arc::new(AtomicUsize::new(0));
        let loader = {
            let gate = Arc::clone(&gate);
            let loads = Arc::clone(&loads);
            move |_id: u64| {
                let gate = Arc::clone(&gate);
                let loads = Arc::clone(&loads);
                async move {
                    gate.notified().await;
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok(Some(snapshot("new")))
                }
            }
        };

        // Stale data comes back immediately; the rebuild is still gated.
        let got = cache
            .get_with_logical_expiry("test:", 9u64, freshness, loader)
            .await
            .unwrap();
        assert_eq!(got, Some(snapshot("old")));
        assert_eq!(loads.load(Ordering::SeqCst), 0);

        gate.notify_one();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let read: Option<Snapshot> = cache
                .get_with_logical_expiry("test:", 9u64, freshness, |_id: u64| async move {
                    Ok(Some(snapshot("unexpected")))
                })
                .await
                .unwrap();
            if read == Some(snapshot("new")) {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "rebuild never landed");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn logical_expiry_returns_none_on_cold_keys_without_loading() {
        let (cache, _store, _clock) = fixture();
        let loads = Arc::new(AtomicUsize::new(0));
        let loader = {
            let loads = Arc::clone(&loads);
            move |_id: u64| {
                let loads = Arc::clone(&loads);
                async move {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok(Some(snapshot("warm")))
                }
            }
        };

        let got: Option<Snapshot> = cache
            .get_with_logical_expiry("test:", 55u64, Duration::from_secs(60), loader)
            .await
            .unwrap();
        assert_eq!(got, None);
        assert_eq!(loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn logical_expiry_drops_the_vanished_entity() {
        let (cache, store, clock) = fixture();
        let freshness = Duration::from_secs(60);
        cache
            .set_with_logical_expiry("test:", 9u64, &snapshot("old"), freshness)
            .await
            .unwrap();
        clock.advance(Duration::from_secs(120));

        let stale = cache
            .get_with_logical_expiry("test:", 9u64, freshness, |_id: u64| async move {
                Ok(None::<Snapshot>)
            })
            .await
            .unwrap();
        assert_eq!(stale, Some(snapshot("old")));

        let key = keys::cache_key("test:", 9u64);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while store.get(&key).await.unwrap().is_some() {
            assert!(tokio::time::Instant::now() < deadline, "key never deleted");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn saturated_rebuild_pool_drops_the_job_and_surrenders_the_lock() {
        let config = CacheConfig {
            rebuild_workers: 1,
            rebuild_queue_depth: 1,
            ..test_config()
        };
        let (cache, store, clock) = fixture_with(config);
        let freshness = Duration::from_secs(60);
        for id in [1u64, 2, 3] {
            cache
                .set_with_logical_expiry("test:", id, &snapshot("old"), freshness)
                .await
                .unwrap();
        }
        clock.advance(Duration::from_secs(120));

        let started = Arc::new(Notify::new());
        let gate = Arc::new(Notify::new());
        let blocking_loader = |signal_start: bool| {
            let started = Arc::clone(&started);
            let gate = Arc::clone(&gate);
            move |_id: u64| {
                let started = Arc::clone(&started);
                let gate = Arc::clone(&gate);
                async move {
                    if signal_start {
                        started.notify_one();
                    }
                    gate.notified().await;
                    Ok(Some(snapshot("new")))
                }
            }
        };

        // Key 1: the single worker picks the job and blocks on the gate.
        cache
            .get_with_logical_expiry("test:", 1u64, freshness, blocking_loader(true))
            .await
            .unwrap();
        started.notified().await;

        // Key 2 fills the one queue slot.
        cache
            .get_with_logical_expiry("test:", 2u64, freshness, blocking_loader(false))
            .await
            .unwrap();

        // Key 3 finds the pool full: stale data still served, job dropped.
        let loads3 = Arc::new(AtomicUsize::new(0));
        let loader3 = {
            let loads3 = Arc::clone(&loads3);
            move |_id: u64| {
                let loads3 = Arc::clone(&loads3);
                async move {
                    loads3.fetch_add(1, Ordering::SeqCst);
                    Ok(Some(snapshot("new")))
                }
            }
        };
        let got = cache
            .get_with_logical_expiry("test:", 3u64, freshness, loader3)
            .await
            .unwrap();
        assert_eq!(got, Some(snapshot("old")));
        assert_eq!(loads3.load(Ordering::SeqCst), 0);

        // The surrendered lock is free for the next stale read to take.
        let lock = DistributedLock::new(Arc::clone(&store));
        let lock_key = keys::rebuild_lock_key(&keys::cache_key("test:", 3u64));
        assert!(lock
            .try_acquire(&lock_key, Duration::from_secs(1))
            .await
            .unwrap()
            .is_some());
    }
}
