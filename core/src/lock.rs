//! Lease-based distributed lock.
//!
//! Deliberately minimal: [`try_acquire`](DistributedLock::try_acquire) is a
//! single test-and-set attempt (no queuing, no fairness, no reentrancy) and
//! [`release`](DistributedLock::release) deletes the key only while it still
//! holds this acquisition's token, so a holder that outlived its lease
//! cannot free a successor's lock. The lease bounds how long a crashed
//! holder can wedge the key.

use crate::error::Result;
use crate::store::CoordinationStore;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Proof of one successful acquisition.
///
/// The token value is written into the lock key; release compares against
/// it, so a stale holder's release is a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(Uuid);

impl LockToken {
    fn mint() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Single-attempt, lease-based lock over the coordination store.
pub struct DistributedLock<S> {
    store: Arc<S>,
}

impl<S: CoordinationStore> DistributedLock<S> {
    /// Lock handle over `store`.
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// One test-and-set attempt on `key` with `lease`.
    ///
    /// Returns a token on success and `None` while someone else holds the
    /// key. Never waits.
    ///
    /// # Errors
    ///
    /// [`Error::Coordination`](crate::error::Error::Coordination) when the
    /// store is unreachable.
    pub async fn try_acquire(&self, key: &str, lease: Duration) -> Result<Option<LockToken>> {
        let token = LockToken::mint();
        if self
            .store
            .set_if_absent(key, &token.to_string(), lease)
            .await?
        {
            Ok(Some(token))
        } else {
            Ok(None)
        }
    }

    /// Release `key` if it still holds `token`.
    ///
    /// Returns `false` when the key no longer holds this token, meaning the
    /// lease expired and someone else may own the key now; nothing is
    /// deleted in that case.
    ///
    /// # Errors
    ///
    /// [`Error::Coordination`](crate::error::Error::Coordination) when the
    /// store is unreachable.
    pub async fn release(&self, key: &str, token: &LockToken) -> Result<bool> {
        self.store.compare_and_delete(key, &token.to_string()).await
    }
}
