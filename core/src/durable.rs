//! Durable storage seam.
//!
//! Vouchers and orders live in an external system of record. The pipeline
//! reaches it exclusively through [`DurableStore`]; schema and access
//! technology stay on the other side of this trait.

use crate::error::Result;
use crate::types::{Order, UserId, Voucher, VoucherId};
use std::future::Future;

/// Authoritative voucher and order storage.
pub trait DurableStore: Send + Sync {
    /// Fetch a voucher.
    ///
    /// # Errors
    ///
    /// [`Error::Storage`](crate::error::Error::Storage) when the store fails
    /// the call.
    fn get_voucher(
        &self,
        voucher: VoucherId,
    ) -> impl Future<Output = Result<Option<Voucher>>> + Send;

    /// Fetch the existing order for `(user, voucher)`, if any.
    ///
    /// # Errors
    ///
    /// [`Error::Storage`](crate::error::Error::Storage) when the store fails
    /// the call.
    fn get_order(
        &self,
        user: UserId,
        voucher: VoucherId,
    ) -> impl Future<Output = Result<Option<Order>>> + Send;

    /// Persist a new order.
    ///
    /// # Errors
    ///
    /// [`Error::Storage`](crate::error::Error::Storage) when the write
    /// fails, including uniqueness violations on `(user, voucher)`.
    fn insert_order(&self, order: &Order) -> impl Future<Output = Result<()>> + Send;

    /// Decrement the voucher's stock, only while it is positive.
    ///
    /// Returns whether a unit was taken; `false` means the stock was already
    /// zero or the voucher is unknown (affected-rows semantics).
    ///
    /// # Errors
    ///
    /// [`Error::Storage`](crate::error::Error::Storage) when the write
    /// fails.
    fn conditional_decrement_stock(
        &self,
        voucher: VoucherId,
    ) -> impl Future<Output = Result<bool>> + Send;
}
