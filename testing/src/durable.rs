//! In-memory durable store double.

use hotdrop_core::durable::DurableStore;
use hotdrop_core::error::{Error, Result};
use hotdrop_core::types::{Order, UserId, Voucher, VoucherId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

/// In-memory [`DurableStore`] with injectable failures.
///
/// Enforces the same shape a relational schema would: vouchers keyed by ID,
/// at most one order per `(user, voucher)`, and a stock decrement that only
/// fires while stock is positive. [`fail_next_inserts`] and
/// [`fail_next_decrements`] make the next N writes return a transient
/// storage error, for crash-recovery tests.
///
/// [`fail_next_inserts`]: InMemoryDurableStore::fail_next_inserts
/// [`fail_next_decrements`]: InMemoryDurableStore::fail_next_decrements
#[derive(Default)]
pub struct InMemoryDurableStore {
    vouchers: Mutex<HashMap<VoucherId, Voucher>>,
    orders: Mutex<Vec<Order>>,
    insert_failures: AtomicUsize,
    decrement_failures: AtomicUsize,
}

impl InMemoryDurableStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a voucher row.
    pub fn put_voucher(&self, voucher: Voucher) {
        self.lock_vouchers().insert(voucher.id, voucher);
    }

    /// Snapshot of every persisted order.
    #[must_use]
    pub fn orders(&self) -> Vec<Order> {
        self.lock_orders().clone()
    }

    /// Number of persisted orders.
    #[must_use]
    pub fn order_count(&self) -> usize {
        self.lock_orders().len()
    }

    /// Remaining durable stock for `voucher`.
    #[must_use]
    pub fn stock_of(&self, voucher: VoucherId) -> Option<u32> {
        self.lock_vouchers().get(&voucher).map(|v| v.stock)
    }

    /// Fail the next `n` order inserts with a transient storage error.
    pub fn fail_next_inserts(&self, n: usize) {
        self.insert_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` stock decrements with a transient storage error.
    pub fn fail_next_decrements(&self, n: usize) {
        self.decrement_failures.store(n, Ordering::SeqCst);
    }

    #[allow(clippy::unwrap_used)] // Test double: mutex poisoning is a test failure
    fn lock_vouchers(&self) -> MutexGuard<'_, HashMap<VoucherId, Voucher>> {
        self.vouchers.lock().unwrap()
    }

    #[allow(clippy::unwrap_used)] // Test double: mutex poisoning is a test failure
    fn lock_orders(&self) -> MutexGuard<'_, Vec<Order>> {
        self.orders.lock().unwrap()
    }
}

/// Consume one injected failure, if any are armed.
fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl DurableStore for InMemoryDurableStore {
    async fn get_voucher(&self, voucher: VoucherId) -> Result<Option<Voucher>> {
        Ok(self.lock_vouchers().get(&voucher).cloned())
    }

    async fn get_order(&self, user: UserId, voucher: VoucherId) -> Result<Option<Order>> {
        Ok(self
            .lock_orders()
            .iter()
            .find(|order| order.user_id == user && order.voucher_id == voucher)
            .cloned())
    }

    async fn insert_order(&self, order: &Order) -> Result<()> {
        if take_failure(&self.insert_failures) {
            return Err(Error::Storage("injected insert failure".to_string()));
        }
        let mut orders = self.lock_orders();
        // Replaying the same order is a no-op, as an idempotent writer sees.
        if orders.iter().any(|existing| existing.id == order.id) {
            return Ok(());
        }
        if orders
            .iter()
            .any(|existing| existing.user_id == order.user_id && existing.voucher_id == order.voucher_id)
        {
            return Err(Error::Storage(format!(
                "unique constraint violation: user {} already ordered voucher {}",
                order.user_id, order.voucher_id
            )));
        }
        orders.push(order.clone());
        Ok(())
    }

    async fn conditional_decrement_stock(&self, voucher: VoucherId) -> Result<bool> {
        if take_failure(&self.decrement_failures) {
            return Err(Error::Storage("injected decrement failure".to_string()));
        }
        let mut vouchers = self.lock_vouchers();
        match vouchers.get_mut(&voucher) {
            Some(row) if row.stock > 0 => {
                row.stock -= 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use chrono::Utc;
    use hotdrop_core::types::OrderId;

    fn voucher(id: u64, stock: u32) -> Voucher {
        let now = Utc::now();
        Voucher {
            id: VoucherId::new(id),
            stock,
            begin_time: now,
            end_time: now,
        }
    }

    fn order(id: u64, user: u64, voucher: u64) -> Order {
        Order {
            id: OrderId::new(id),
            user_id: UserId::new(user),
            voucher_id: VoucherId::new(voucher),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn decrement_stops_at_zero() {
        let store = InMemoryDurableStore::new();
        store.put_voucher(voucher(1, 2));
        assert!(store.conditional_decrement_stock(VoucherId::new(1)).await.unwrap());
        assert!(store.conditional_decrement_stock(VoucherId::new(1)).await.unwrap());
        assert!(!store.conditional_decrement_stock(VoucherId::new(1)).await.unwrap());
        assert_eq!(store.stock_of(VoucherId::new(1)), Some(0));
    }

    #[tokio::test]
    async fn unknown_vouchers_do_not_decrement() {
        let store = InMemoryDurableStore::new();
        assert!(!store.conditional_decrement_stock(VoucherId::new(9)).await.unwrap());
    }

    #[tokio::test]
    async fn replayed_inserts_are_no_ops_but_conflicts_are_errors() {
        let store = InMemoryDurableStore::new();
        store.insert_order(&order(1, 10, 1)).await.unwrap();
        // Same order replayed.
        store.insert_order(&order(1, 10, 1)).await.unwrap();
        assert_eq!(store.order_count(), 1);
        // Different order for the same (user, voucher).
        let conflict = store.insert_order(&order(2, 10, 1)).await;
        assert!(matches!(conflict, Err(Error::Storage(_))));
    }

    #[tokio::test]
    async fn injected_failures_arm_once_per_call() {
        let store = InMemoryDurableStore::new();
        store.fail_next_inserts(1);
        assert!(store.insert_order(&order(1, 10, 1)).await.is_err());
        assert!(store.insert_order(&order(1, 10, 1)).await.is_ok());
    }
}
