#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Hotdrop Redis
//!
//! Redis implementation of the hotdrop [`CoordinationStore`]:
//!
//! - the reservation step runs as one Lua script (purchaser marker, stock
//!   check, decrement, stream append),
//! - the reservation log is a Redis stream read through a consumer group,
//! - locks use `SET NX PX` and a token-checked compare-and-delete script,
//! - cache values and ID sequence counters are plain keys.
//!
//! ## Example
//!
//! ```no_run
//! use hotdrop_redis::RedisCoordinationStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store =
//!     RedisCoordinationStore::connect("redis://127.0.0.1:6379", "hotdrop:reservations").await?;
//! # Ok(())
//! # }
//! ```
//!
//! [`CoordinationStore`]: hotdrop_core::store::CoordinationStore

mod store;

pub use store::RedisCoordinationStore;
