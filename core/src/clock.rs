//! Time source abstraction.
//!
//! Window checks, ID generation and logical expiry all read time through
//! this trait so tests can drive the clock manually.

use chrono::{DateTime, Utc};

/// A source of the current UTC instant.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
