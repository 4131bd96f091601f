//! The coordination store capability interface.
//!
//! The pipeline needs a small set of primitives from its low-latency store:
//! one atomic scripted step for reservations, an append-only log with
//! consumer-group delivery, test-and-set / compare-and-delete for locks, an
//! atomic counter, and plain key/value reads and writes for the cache.
//! [`CoordinationStore`] captures exactly those. `hotdrop-redis` implements
//! it against Redis; `hotdrop-testing` provides an in-memory double with the
//! same atomicity guarantees.

use crate::error::Result;
use crate::types::ReservationMessage;
use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Outcome of the atomic reservation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveStatus {
    /// Stock was decremented, the marker recorded and the message appended.
    Reserved,
    /// Cached stock was absent or not positive.
    SoldOut,
    /// The user already holds a marker for this voucher.
    Duplicate,
}

/// Position of an entry in the reservation log.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryId(String);

impl EntryId {
    /// Wrap a store-issued entry ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw ID.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A reservation message together with its log position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationDelivery {
    /// Log position to acknowledge once handled.
    pub entry_id: EntryId,
    /// The reservation to materialize.
    pub message: ReservationMessage,
}

/// Low-latency store primitives the pipeline is built on.
///
/// Implementations must make [`try_reserve`](Self::try_reserve) a single
/// indivisible step: no concurrent reservation may observe its partial
/// effects. Everything else is plain request/response.
pub trait CoordinationStore: Send + Sync {
    /// Run the reservation step for `message`.
    ///
    /// Checks the purchaser marker, then the cached stock, and on success
    /// decrements the stock, records the marker and appends `message` to the
    /// reservation log, all in one atomic step. An absent stock key reads as
    /// zero. Marker before stock: a prior winner reads
    /// [`Duplicate`](ReserveStatus::Duplicate) even after sellout.
    ///
    /// # Errors
    ///
    /// [`Error::Coordination`](crate::error::Error::Coordination) when the
    /// store is unreachable or rejects the script.
    fn try_reserve(
        &self,
        message: &ReservationMessage,
    ) -> impl Future<Output = Result<ReserveStatus>> + Send;

    /// Create the reservation log and consumer `group` if either is missing.
    /// Idempotent.
    ///
    /// # Errors
    ///
    /// [`Error::Coordination`](crate::error::Error::Coordination) on
    /// transport failure.
    fn ensure_group(&self, group: &str) -> impl Future<Output = Result<()>> + Send;

    /// Deliver the next new log entry to `consumer`, blocking up to `block`.
    ///
    /// Returns `None` when the timeout elapses with nothing to deliver. A
    /// delivered entry joins the consumer's pending list until acknowledged.
    ///
    /// # Errors
    ///
    /// [`Error::MalformedEntry`](crate::error::Error::MalformedEntry) when an
    /// entry was delivered but its fields do not parse (it still joins the
    /// pending list and must be acknowledged to be dropped);
    /// [`Error::Coordination`](crate::error::Error::Coordination) on
    /// transport failure.
    fn read_new(
        &self,
        group: &str,
        consumer: &str,
        block: Duration,
    ) -> impl Future<Output = Result<Option<ReservationDelivery>>> + Send;

    /// Oldest entry delivered to `consumer` but never acknowledged.
    ///
    /// Returns `None` once the consumer's pending list is empty.
    ///
    /// # Errors
    ///
    /// Same as [`read_new`](Self::read_new).
    fn read_pending(
        &self,
        group: &str,
        consumer: &str,
    ) -> impl Future<Output = Result<Option<ReservationDelivery>>> + Send;

    /// Acknowledge `entry_id` for `group`, removing it from the pending
    /// list.
    ///
    /// # Errors
    ///
    /// [`Error::Coordination`](crate::error::Error::Coordination) on
    /// transport failure.
    fn ack(&self, group: &str, entry_id: &EntryId) -> impl Future<Output = Result<()>> + Send;

    /// Set `key = value` with `ttl`, only if the key is absent. Returns
    /// whether the write happened.
    ///
    /// # Errors
    ///
    /// [`Error::Coordination`](crate::error::Error::Coordination) on
    /// transport failure.
    fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Delete `key` only if it currently holds `expected`, atomically.
    /// Returns whether a deletion happened.
    ///
    /// # Errors
    ///
    /// [`Error::Coordination`](crate::error::Error::Coordination) on
    /// transport failure.
    fn compare_and_delete(
        &self,
        key: &str,
        expected: &str,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Atomically increment the integer at `key`, returning the new value.
    /// An absent key counts from zero.
    ///
    /// # Errors
    ///
    /// [`Error::Coordination`](crate::error::Error::Coordination) on
    /// transport failure.
    fn increment(&self, key: &str) -> impl Future<Output = Result<u64>> + Send;

    /// Read `key`.
    ///
    /// # Errors
    ///
    /// [`Error::Coordination`](crate::error::Error::Coordination) on
    /// transport failure.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>>> + Send;

    /// Write `key = value`, with a physical TTL when `ttl` is `Some`.
    ///
    /// # Errors
    ///
    /// [`Error::Coordination`](crate::error::Error::Coordination) on
    /// transport failure.
    fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Delete `key` unconditionally.
    ///
    /// # Errors
    ///
    /// [`Error::Coordination`](crate::error::Error::Coordination) on
    /// transport failure.
    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[test]
    fn entry_ids_display_their_raw_form() {
        let id = EntryId::new("1700000000000-3");
        assert_eq!(id.to_string(), "1700000000000-3");
        assert_eq!(id.as_str(), "1700000000000-3");
    }
}
