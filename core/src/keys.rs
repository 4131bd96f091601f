//! Coordination store key layout.
//!
//! Every [`CoordinationStore`] implementation shares this layout, so the
//! reservation script, the lock callers and the tests agree on where state
//! lives. All keys sit under the `hotdrop:` namespace.
//!
//! | family             | shape                             |
//! |--------------------|-----------------------------------|
//! | cached stock       | `hotdrop:stock:{voucherId}`       |
//! | purchaser markers  | `hotdrop:buyers:{voucherId}`      |
//! | order lock         | `hotdrop:lock:order:{userId}`     |
//! | cache rebuild lock | `hotdrop:lock:rebuild:{cacheKey}` |
//! | cached entities    | `{prefix}{id}`                    |
//! | ID sequences       | `hotdrop:seq:{tag}:{yyyy:MM:dd}`  |
//!
//! [`CoordinationStore`]: crate::store::CoordinationStore

use crate::types::{UserId, VoucherId};
use chrono::NaiveDate;
use std::fmt::Display;

/// Stream holding reservation messages awaiting fulfillment.
pub const RESERVATION_STREAM: &str = "hotdrop:reservations";

/// Default consumer group of the fulfillment workers.
pub const FULFILLMENT_GROUP: &str = "fulfillment";

/// Cache key prefix for voucher snapshots.
pub const VOUCHER_CACHE_PREFIX: &str = "hotdrop:cache:voucher:";

/// Cached stock counter for a voucher.
#[must_use]
pub fn stock_key(voucher: VoucherId) -> String {
    format!("hotdrop:stock:{voucher}")
}

/// Purchaser-marker set for a voucher.
#[must_use]
pub fn purchasers_key(voucher: VoucherId) -> String {
    format!("hotdrop:buyers:{voucher}")
}

/// Per-user lock serializing order materialization.
#[must_use]
pub fn order_lock_key(user: UserId) -> String {
    format!("hotdrop:lock:order:{user}")
}

/// Per-key lock serializing cache rebuilds.
#[must_use]
pub fn rebuild_lock_key(cache_key: &str) -> String {
    format!("hotdrop:lock:rebuild:{cache_key}")
}

/// Cache key for an entity under `prefix`.
#[must_use]
pub fn cache_key(prefix: &str, id: impl Display) -> String {
    format!("{prefix}{id}")
}

/// Daily sequence counter behind the ID generator.
#[must_use]
pub fn sequence_key(tag: &str, date: NaiveDate) -> String {
    format!("hotdrop:seq:{tag}:{}", date.format("%Y:%m:%d"))
}
