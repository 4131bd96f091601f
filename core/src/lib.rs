#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Hotdrop Core
//!
//! Core components of the hotdrop flash-sale pipeline: sell limited-stock
//! vouchers without overselling and without double purchases, at
//! coordination-store speed.
//!
//! A purchase runs in two halves:
//!
//! 1. **Reserve (synchronous)**: [`ReservationEngine::attempt_purchase`]
//!    checks the sale window against a cached snapshot, mints an order ID
//!    and runs one atomic step against the [`CoordinationStore`] covering
//!    the stock check, the per-user dedup marker, the decrement and the log
//!    append. The buyer gets a win-or-lose answer immediately.
//! 2. **Fulfill (asynchronous)**: the [`FulfillmentPool`]'s consumer-group
//!    workers drain the reservation log into the [`DurableStore`],
//!    idempotently, replaying pending entries after a crash.
//!
//! Around the core sit a single-attempt [`DistributedLock`], a
//! stampede-resistant [`CacheClient`] and a time-ordered [`IdGenerator`],
//! all over the same store traits: tests run everything in memory
//! (`hotdrop-testing`), production runs on Redis (`hotdrop-redis`).
//!
//! ## Example
//!
//! ```ignore
//! use hotdrop_core::{
//!     CacheClient, FulfillmentPool, HotdropConfig, RequestContext,
//!     ReservationEngine, SystemClock,
//! };
//! use hotdrop_redis::RedisCoordinationStore;
//! use std::sync::Arc;
//!
//! let config = HotdropConfig::from_env();
//! let store = Arc::new(
//!     RedisCoordinationStore::connect(&config.redis.url, &config.fulfillment.stream).await?,
//! );
//! let clock: Arc<dyn hotdrop_core::Clock> = Arc::new(SystemClock);
//! let cache = Arc::new(CacheClient::new(
//!     Arc::clone(&store),
//!     Arc::clone(&clock),
//!     config.cache.clone(),
//! ));
//! let engine = ReservationEngine::new(
//!     Arc::clone(&store),
//!     Arc::clone(&durable),
//!     cache,
//!     Arc::clone(&clock),
//!     &config.cache,
//! );
//! let pool = FulfillmentPool::start(store, durable, clock, config.fulfillment).await?;
//!
//! engine.open_sale(&voucher).await?;
//! let outcome = engine.attempt_purchase(&ctx, voucher.id).await?;
//! ```

pub use chrono::{DateTime, Utc};

pub mod cache;
pub mod clock;
pub mod config;
pub mod durable;
pub mod error;
pub mod fulfillment;
pub mod idgen;
pub mod keys;
pub mod lock;
pub mod reservation;
pub mod store;
pub mod types;

pub use cache::CacheClient;
pub use clock::{Clock, SystemClock};
pub use config::{CacheConfig, FulfillmentConfig, HotdropConfig, RedisConfig};
pub use durable::DurableStore;
pub use error::{Error, Result};
pub use fulfillment::{FulfillmentPool, FulfillmentWorker};
pub use idgen::IdGenerator;
pub use lock::{DistributedLock, LockToken};
pub use reservation::{PurchaseOutcome, ReservationEngine};
pub use store::{CoordinationStore, EntryId, ReservationDelivery, ReserveStatus};
pub use types::{
    Order, OrderId, RequestContext, ReservationMessage, UserId, Voucher, VoucherId,
};

// Unit tests drive the pipeline against the in-memory doubles, but the
// dev-dependency cycle with `hotdrop-testing` makes Cargo build this crate
// twice: doubles compiled against the other copy do not implement this
// copy's traits. Compile the double sources into the test build directly;
// the `self` alias lets their `hotdrop_core::` imports resolve here.
#[cfg(test)]
extern crate self as hotdrop_core;

#[cfg(test)]
#[path = "../../testing/src/clock.rs"]
mod testing_clock;

#[cfg(test)]
#[path = "../../testing/src/coordination.rs"]
mod testing_coordination;

#[cfg(test)]
#[path = "../../testing/src/durable.rs"]
mod testing_durable;

#[cfg(test)]
pub use testing_clock::ManualClock;
#[cfg(test)]
pub use testing_coordination::InMemoryCoordinationStore;
#[cfg(test)]
pub use testing_durable::InMemoryDurableStore;
