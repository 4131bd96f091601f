//! Distributed ID generation.
//!
//! An ID is `(seconds since the generator epoch) << 32 | sequence`, where
//! the sequence is an atomic counter in the coordination store scoped per
//! `(tag, calendar date)`. The timestamp occupies the high bits, so IDs sort
//! roughly by mint time and the daily counter reset can never collide with
//! an earlier day. Distinctness across processes comes from the shared
//! counter.

use crate::clock::Clock;
use crate::error::Result;
use crate::keys;
use crate::store::CoordinationStore;
use std::sync::Arc;

/// Seconds of the generator epoch: 2022-01-01T00:00:00Z.
pub const ID_EPOCH_SECONDS: i64 = 1_640_995_200;

/// Low bits carrying the per-day sequence.
const SEQUENCE_BITS: u32 = 32;

/// Mints 64-bit, roughly time-ordered identifiers.
pub struct IdGenerator<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: CoordinationStore> IdGenerator<S> {
    /// Generator over `store`, timestamped by `clock`.
    #[must_use]
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Mint the next ID for `tag`.
    ///
    /// More than 2^32 allocations for one tag in one day would bleed into
    /// the timestamp bits; that is far outside the intended envelope.
    ///
    /// # Errors
    ///
    /// [`Error::Coordination`](crate::error::Error::Coordination) when the
    /// counter increment fails.
    pub async fn next_id(&self, tag: &str) -> Result<u64> {
        let now = self.clock.now();
        // A clock before the epoch saturates to zero rather than wrapping.
        let seconds = u64::try_from(now.timestamp() - ID_EPOCH_SECONDS).unwrap_or(0);
        let sequence = self
            .store
            .increment(&keys::sequence_key(tag, now.date_naive()))
            .await?;
        Ok(compose(seconds, sequence))
    }
}

const fn compose(seconds: u64, sequence: u64) -> u64 {
    (seconds << SEQUENCE_BITS) | sequence
}
