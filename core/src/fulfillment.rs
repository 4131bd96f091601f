//! The asynchronous half of a purchase.
//!
//! A pool of workers drains the reservation log into durable storage. Each
//! worker is one consumer-group member running a three-state loop:
//!
//! - **CatchUp**: on start, replay this consumer's pending entries (entries
//!   delivered before a crash but never acknowledged) to exhaustion.
//! - **Live**: blocking-read one new entry at a time, materialize it,
//!   acknowledge it.
//! - **Recovering**: after an infrastructure error, replay pending entries
//!   exactly like CatchUp, then resume Live.
//!
//! Delivery is at-least-once. An entry is acknowledged only after handling
//! concludes, so a crash mid-flight leaves it pending for replay, and
//! materialization is idempotent: re-check for an existing order, decrement
//! stock conditionally, all under the per-user lock. A busy user lock defers
//! the entry instead of dropping it: it stays unacknowledged and replays
//! once the holder's lease clears. Consumer names derive from the configured
//! prefix and worker index; keep both stable across restarts or pending
//! entries are orphaned.
//!
//! There is no transaction spanning the conditional decrement and the order
//! insert. A crash exactly between them costs one unit of durable stock on
//! replay; the `stock > 0` guard keeps the error in the undersell direction.

use crate::clock::Clock;
use crate::config::FulfillmentConfig;
use crate::durable::DurableStore;
use crate::error::{Error, Result};
use crate::keys;
use crate::lock::DistributedLock;
use crate::store::{CoordinationStore, EntryId, ReservationDelivery};
use crate::types::{Order, ReservationMessage};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    CatchUp,
    Live,
    Recovering,
}

/// How one delivery was settled. Every variant acknowledges the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settled {
    /// Order written.
    Persisted,
    /// An order for this `(user, voucher)` already exists.
    Duplicate,
    /// Durable stock was already zero, an invariant violation.
    StockExhausted,
}

/// Whether a step left the consumer clean or needs the replay path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepOutcome {
    Clean,
    /// A delivery was deferred on lock contention and stays pending.
    Contended,
}

/// One consumer-group member.
pub struct FulfillmentWorker<S, D> {
    store: Arc<S>,
    durable: Arc<D>,
    lock: DistributedLock<S>,
    clock: Arc<dyn Clock>,
    config: FulfillmentConfig,
    consumer: String,
    shutdown: watch::Receiver<bool>,
}

impl<S, D> FulfillmentWorker<S, D>
where
    S: CoordinationStore,
    D: DurableStore,
{
    /// Worker reading as `consumer` until `shutdown` flips to true.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        durable: Arc<D>,
        clock: Arc<dyn Clock>,
        config: FulfillmentConfig,
        consumer: String,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let lock = DistributedLock::new(Arc::clone(&store));
        Self {
            store,
            durable,
            lock,
            clock,
            config,
            consumer,
            shutdown,
        }
    }

    /// Run until shutdown.
    ///
    /// Never returns an error: infrastructure failures push the worker into
    /// Recovering, anomalies are logged and dropped.
    #[allow(clippy::cognitive_complexity)]
    pub async fn run(mut self) {
        tracing::info!(
            consumer = %self.consumer,
            group = %self.config.group,
            "Fulfillment worker starting"
        );
        let mut state = WorkerState::CatchUp;
        while !*self.shutdown.borrow() {
            state = match state {
                WorkerState::CatchUp | WorkerState::Recovering => {
                    match self.drain_pending().await {
                        Ok(StepOutcome::Clean) => WorkerState::Live,
                        Ok(StepOutcome::Contended) => {
                            self.pause().await;
                            WorkerState::Recovering
                        }
                        Err(error) => {
                            tracing::error!(
                                consumer = %self.consumer,
                                error = %error,
                                "Pending replay failed"
                            );
                            self.pause().await;
                            WorkerState::Recovering
                        }
                    }
                }
                WorkerState::Live => match self.live_step().await {
                    Ok(StepOutcome::Clean) => WorkerState::Live,
                    Ok(StepOutcome::Contended) => {
                        self.pause().await;
                        WorkerState::Recovering
                    }
                    Err(error) => {
                        tracing::error!(
                            consumer = %self.consumer,
                            error = %error,
                            "Fulfillment step failed, replaying pending entries"
                        );
                        self.pause().await;
                        WorkerState::Recovering
                    }
                },
            };
        }
        tracing::info!(consumer = %self.consumer, "Fulfillment worker stopped");
    }

    /// Replay this consumer's pending entries to exhaustion.
    ///
    /// Stops at the first deferred entry so the next pass retries it first;
    /// replay order is the original delivery order.
    async fn drain_pending(&self) -> Result<StepOutcome> {
        while let Some(delivery) = self.next_delivery(true).await? {
            if self.handle(delivery).await? == StepOutcome::Contended {
                return Ok(StepOutcome::Contended);
            }
        }
        Ok(StepOutcome::Clean)
    }

    /// One live iteration: read a new entry (bounded block) and handle it.
    async fn live_step(&self) -> Result<StepOutcome> {
        match self.next_delivery(false).await? {
            Some(delivery) => self.handle(delivery).await,
            None => Ok(StepOutcome::Clean),
        }
    }

    /// Read the next entry, acknowledging and skipping malformed ones.
    async fn next_delivery(&self, replay: bool) -> Result<Option<ReservationDelivery>> {
        loop {
            let read = if replay {
                self.store
                    .read_pending(&self.config.group, &self.consumer)
                    .await
            } else {
                self.store
                    .read_new(&self.config.group, &self.consumer, self.config.block_timeout)
                    .await
            };
            match read {
                Err(Error::MalformedEntry { entry_id, reason }) => {
                    tracing::error!(
                        consumer = %self.consumer,
                        entry = %entry_id,
                        reason = %reason,
                        "Dropping malformed reservation entry"
                    );
                    metrics::counter!("fulfillment.anomalies", "kind" => "malformed_entry")
                        .increment(1);
                    self.store
                        .ack(&self.config.group, &EntryId::new(entry_id))
                        .await?;
                }
                other => return other,
            }
        }
    }

    /// Materialize one delivery, acknowledging every settled outcome.
    ///
    /// A busy order lock acknowledges nothing: the entry stays pending and
    /// the caller switches to the replay path.
    async fn handle(&self, delivery: ReservationDelivery) -> Result<StepOutcome> {
        let message = &delivery.message;
        let Some(settled) = self.materialize(message).await? else {
            metrics::counter!("fulfillment.deferred", "reason" => "lock_busy").increment(1);
            tracing::warn!(
                consumer = %self.consumer,
                user = %message.user_id,
                "Order lock busy, deferring entry for replay"
            );
            return Ok(StepOutcome::Contended);
        };
        self.store.ack(&self.config.group, &delivery.entry_id).await?;

        match settled {
            Settled::Persisted => {
                metrics::counter!("fulfillment.settled", "result" => "persisted").increment(1);
                tracing::info!(
                    consumer = %self.consumer,
                    order = %message.order_id,
                    user = %message.user_id,
                    voucher = %message.voucher_id,
                    "Order persisted"
                );
            }
            Settled::Duplicate => {
                metrics::counter!("fulfillment.settled", "result" => "duplicate").increment(1);
                tracing::warn!(
                    consumer = %self.consumer,
                    user = %message.user_id,
                    voucher = %message.voucher_id,
                    "Duplicate delivery, order already exists"
                );
            }
            Settled::StockExhausted => {
                metrics::counter!("fulfillment.anomalies", "kind" => "stock_exhausted")
                    .increment(1);
                tracing::error!(
                    consumer = %self.consumer,
                    order = %message.order_id,
                    voucher = %message.voucher_id,
                    "Durable stock exhausted during fulfillment, dropping entry"
                );
            }
        }
        Ok(StepOutcome::Clean)
    }

    /// Idempotent materialization under the per-user order lock.
    ///
    /// `None` means the lock is held elsewhere and nothing was touched.
    async fn materialize(&self, message: &ReservationMessage) -> Result<Option<Settled>> {
        let lock_key = keys::order_lock_key(message.user_id);
        let Some(token) = self
            .lock
            .try_acquire(&lock_key, self.config.order_lock_lease)
            .await?
        else {
            return Ok(None);
        };
        let settled = self.materialize_locked(message).await;
        if let Err(error) = self.lock.release(&lock_key, &token).await {
            tracing::warn!(
                consumer = %self.consumer,
                key = %lock_key,
                error = %error,
                "Failed to release order lock"
            );
        }
        settled.map(Some)
    }

    async fn materialize_locked(&self, message: &ReservationMessage) -> Result<Settled> {
        if self
            .durable
            .get_order(message.user_id, message.voucher_id)
            .await?
            .is_some()
        {
            return Ok(Settled::Duplicate);
        }
        if !self
            .durable
            .conditional_decrement_stock(message.voucher_id)
            .await?
        {
            return Ok(Settled::StockExhausted);
        }
        let order = Order {
            id: message.order_id,
            user_id: message.user_id,
            voucher_id: message.voucher_id,
            created_at: self.clock.now(),
        };
        self.durable.insert_order(&order).await?;
        Ok(Settled::Persisted)
    }

    /// Backoff between replay attempts, cut short by shutdown.
    async fn pause(&mut self) {
        let backoff = self.config.recovery_backoff;
        tokio::select! {
            () = tokio::time::sleep(backoff) => {}
            _ = self.shutdown.changed() => {}
        }
    }
}

/// Spawns and owns the fulfillment workers.
pub struct FulfillmentPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl FulfillmentPool {
    /// Provision the log and consumer group, then start the configured
    /// number of workers.
    ///
    /// # Errors
    ///
    /// [`Error::Coordination`](crate::error::Error::Coordination) when group
    /// provisioning fails. Workers themselves never fail the pool.
    pub async fn start<S, D>(
        store: Arc<S>,
        durable: Arc<D>,
        clock: Arc<dyn Clock>,
        config: FulfillmentConfig,
    ) -> Result<Self>
    where
        S: CoordinationStore + 'static,
        D: DurableStore + 'static,
    {
        store.ensure_group(&config.group).await?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let count = config.workers.max(1);
        let mut handles = Vec::with_capacity(count);
        for index in 0..count {
            let consumer = format!("{}-{index}", config.consumer_prefix);
            let worker = FulfillmentWorker::new(
                Arc::clone(&store),
                Arc::clone(&durable),
                Arc::clone(&clock),
                config.clone(),
                consumer,
                shutdown_rx.clone(),
            );
            handles.push(tokio::spawn(worker.run()));
        }
        tracing::info!(workers = count, group = %config.group, "Fulfillment pool started");
        Ok(Self {
            handles,
            shutdown: shutdown_tx,
        })
    }

    /// Signal shutdown and wait for every worker to finish its current
    /// entry. A live worker notices within one block timeout.
    pub async fn shutdown(self) {
        self.shutdown.send(true).ok();
        for handle in self.handles {
            if let Err(error) = handle.await {
                tracing::error!(error = %error, "Fulfillment worker panicked");
            }
        }
    }
}
