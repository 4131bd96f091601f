#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Hotdrop Testing
//!
//! In-memory doubles of the hotdrop store traits, plus a manually driven
//! clock.
//!
//! The doubles keep the semantics the pipeline depends on rather than just
//! the method signatures:
//!
//! - [`InMemoryCoordinationStore`] runs the reservation step atomically
//!   under one lock, tracks per-consumer pending entries the way a consumer
//!   group does, and expires TTL'd keys against the injected clock.
//! - [`InMemoryDurableStore`] enforces one order per `(user, voucher)` and
//!   supports injected failures for crash-recovery tests.
//! - [`ManualClock`] only moves when a test moves it.
//!
//! ## Example
//!
//! ```
//! use hotdrop_core::store::CoordinationStore;
//! use hotdrop_testing::{InMemoryCoordinationStore, ManualClock};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let clock = Arc::new(ManualClock::default());
//! let store = InMemoryCoordinationStore::with_clock(Arc::clone(&clock));
//!
//! store.set("k", "v", Some(Duration::from_secs(5))).await.unwrap();
//! clock.advance(Duration::from_secs(6));
//! assert_eq!(store.get("k").await.unwrap(), None);
//! # }
//! ```

pub mod clock;
pub mod coordination;
pub mod durable;

pub use clock::ManualClock;
pub use coordination::InMemoryCoordinationStore;
pub use durable::InMemoryDurableStore;

/// Install a compact tracing subscriber writing to the test capture.
///
/// Safe to call from every test; only the first call installs.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}
