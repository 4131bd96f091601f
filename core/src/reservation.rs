//! The synchronous half of a purchase.
//!
//! [`ReservationEngine::attempt_purchase`] decides win or lose entirely
//! against the coordination store: it loads a voucher snapshot through the
//! cache, validates the sale window, mints an order ID and runs the atomic
//! reservation step. A confirmed purchase returns its order ID immediately;
//! durable materialization happens later in the fulfillment pool.
//!
//! The window check runs before the atomic step, against the cached
//! snapshot; the step itself is window-agnostic. A request slipping through
//! at the window edge still settles stock and uniqueness atomically.

use crate::cache::CacheClient;
use crate::clock::Clock;
use crate::config::CacheConfig;
use crate::durable::DurableStore;
use crate::error::Result;
use crate::idgen::IdGenerator;
use crate::keys;
use crate::store::{CoordinationStore, ReserveStatus};
use crate::types::{OrderId, RequestContext, ReservationMessage, Voucher, VoucherId};
use std::sync::Arc;
use std::time::Duration;

/// Sequence tag for order IDs.
pub const ORDER_ID_TAG: &str = "order";

/// What a purchase attempt concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseOutcome {
    /// The reservation won; fulfillment will materialize this order.
    Confirmed {
        /// Order ID to hand back to the buyer.
        order_id: OrderId,
    },
    /// Cached stock is exhausted.
    SoldOut,
    /// This user already reserved this voucher.
    Duplicate,
    /// The sale window has not opened yet.
    NotYetOpen,
    /// The sale window is over.
    Closed,
    /// No such voucher.
    UnknownVoucher,
}

impl PurchaseOutcome {
    /// Whether the attempt won a reservation.
    #[must_use]
    pub const fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed { .. })
    }

    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed { .. } => "confirmed",
            Self::SoldOut => "sold_out",
            Self::Duplicate => "duplicate",
            Self::NotYetOpen => "not_yet_open",
            Self::Closed => "closed",
            Self::UnknownVoucher => "unknown_voucher",
        }
    }
}

/// Decides purchases at coordination-store speed.
pub struct ReservationEngine<S, D> {
    store: Arc<S>,
    durable: Arc<D>,
    cache: Arc<CacheClient<S>>,
    ids: IdGenerator<S>,
    clock: Arc<dyn Clock>,
    snapshot_ttl: Duration,
}

impl<S, D> ReservationEngine<S, D>
where
    S: CoordinationStore + 'static,
    D: DurableStore + 'static,
{
    /// Engine over the given stores.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        durable: Arc<D>,
        cache: Arc<CacheClient<S>>,
        clock: Arc<dyn Clock>,
        config: &CacheConfig,
    ) -> Self {
        let ids = IdGenerator::new(Arc::clone(&store), Arc::clone(&clock));
        Self {
            store,
            durable,
            cache,
            ids,
            clock,
            snapshot_ttl: config.value_ttl,
        }
    }

    /// Seed the cached stock counter when `voucher` goes on sale.
    ///
    /// Until this runs, reservations for the voucher report sold out: an
    /// absent stock key reads as zero.
    ///
    /// # Errors
    ///
    /// [`Error::Coordination`](crate::error::Error::Coordination) when the
    /// store is unreachable.
    pub async fn open_sale(&self, voucher: &Voucher) -> Result<()> {
        self.store
            .set(
                &keys::stock_key(voucher.id),
                &voucher.stock.to_string(),
                None,
            )
            .await?;
        tracing::info!(voucher = %voucher.id, stock = voucher.stock, "Sale opened");
        Ok(())
    }

    /// Attempt to buy `voucher_id` for the context's user.
    ///
    /// Business rejections come back as typed outcomes; `Err` is reserved
    /// for infrastructure failures.
    ///
    /// # Errors
    ///
    /// [`Error::Coordination`](crate::error::Error::Coordination) or
    /// [`Error::Storage`](crate::error::Error::Storage) when a store call
    /// fails.
    pub async fn attempt_purchase(
        &self,
        ctx: &RequestContext,
        voucher_id: VoucherId,
    ) -> Result<PurchaseOutcome> {
        let Some(voucher) = self.voucher_snapshot(voucher_id).await? else {
            return Ok(conclude(ctx, voucher_id, PurchaseOutcome::UnknownVoucher));
        };
        let now = self.clock.now();
        if now < voucher.begin_time {
            return Ok(conclude(ctx, voucher_id, PurchaseOutcome::NotYetOpen));
        }
        if now > voucher.end_time {
            return Ok(conclude(ctx, voucher_id, PurchaseOutcome::Closed));
        }

        let order_id = OrderId::new(self.ids.next_id(ORDER_ID_TAG).await?);
        let message = ReservationMessage {
            order_id,
            user_id: ctx.user_id,
            voucher_id,
        };
        let outcome = match self.store.try_reserve(&message).await? {
            ReserveStatus::Reserved => PurchaseOutcome::Confirmed { order_id },
            ReserveStatus::SoldOut => PurchaseOutcome::SoldOut,
            ReserveStatus::Duplicate => PurchaseOutcome::Duplicate,
        };
        Ok(conclude(ctx, voucher_id, outcome))
    }

    async fn voucher_snapshot(&self, voucher_id: VoucherId) -> Result<Option<Voucher>> {
        let durable = Arc::clone(&self.durable);
        self.cache
            .get_with_passthrough(
                keys::VOUCHER_CACHE_PREFIX,
                voucher_id,
                self.snapshot_ttl,
                move |id| {
                    let durable = Arc::clone(&durable);
                    async move { durable.get_voucher(id).await }
                },
            )
            .await
    }
}

fn conclude(ctx: &RequestContext, voucher_id: VoucherId, outcome: PurchaseOutcome) -> PurchaseOutcome {
    metrics::counter!("purchase.attempts", "outcome" => outcome.as_str()).increment(1);
    tracing::debug!(
        user = %ctx.user_id,
        voucher = %voucher_id,
        outcome = outcome.as_str(),
        "Purchase attempt settled"
    );
    outcome
}
