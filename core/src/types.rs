//! Domain types shared across the pipeline.
//!
//! Voucher, user and order identifiers are numeric newtypes: the upstream
//! system issues them as 64-bit integers and the reservation log carries
//! them as decimal strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

/// Identifier of a voucher on sale.
///
/// # Examples
///
/// ```
/// use hotdrop_core::types::VoucherId;
///
/// let id = VoucherId::new(7);
/// assert_eq!(id.value(), 7);
/// assert_eq!(id.to_string(), "7");
/// assert_eq!("7".parse::<VoucherId>(), Ok(id));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VoucherId(u64);

impl VoucherId {
    /// Wrap a numeric voucher ID.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The numeric value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for VoucherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for VoucherId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl FromStr for VoucherId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// Identifier of an authenticated buyer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(u64);

impl UserId {
    /// Wrap a numeric user ID.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The numeric value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for UserId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl FromStr for UserId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// Identifier of an order, minted at reservation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderId(u64);

impl OrderId {
    /// Wrap a numeric order ID.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The numeric value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for OrderId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl FromStr for OrderId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// A voucher as durable storage knows it.
///
/// `stock` is the authoritative remaining stock. The coordination store
/// carries a separate cached counter, seeded when the sale opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voucher {
    /// Voucher identifier.
    pub id: VoucherId,
    /// Remaining durable stock.
    pub stock: u32,
    /// First instant at which purchases are accepted.
    pub begin_time: DateTime<Utc>,
    /// Last instant at which purchases are accepted.
    pub end_time: DateTime<Utc>,
}

/// A materialized purchase. At most one exists per `(user, voucher)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Order identifier minted at reservation time.
    pub id: OrderId,
    /// Buyer.
    pub user_id: UserId,
    /// Voucher purchased.
    pub voucher_id: VoucherId,
    /// Materialization instant.
    pub created_at: DateTime<Utc>,
}

/// The record a winning reservation appends to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationMessage {
    /// Order identifier minted for this reservation.
    pub order_id: OrderId,
    /// Buyer.
    pub user_id: UserId,
    /// Voucher reserved.
    pub voucher_id: VoucherId,
}

/// Per-request context populated at the request boundary.
///
/// The caller authenticates the user and passes the context explicitly;
/// nothing in the pipeline reads ambient request state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestContext {
    /// The authenticated buyer.
    pub user_id: UserId,
}

impl RequestContext {
    /// Context for `user_id`.
    #[must_use]
    pub const fn new(user_id: UserId) -> Self {
        Self { user_id }
    }
}
