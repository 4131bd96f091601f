//! Manually driven clock.

use chrono::{DateTime, Utc};
use hotdrop_core::clock::Clock;
use std::sync::Mutex;
use std::time::Duration;

/// First instant of 2026, a convenient fixed origin for tests.
const DEFAULT_START_SECONDS: i64 = 1_767_225_600;

/// A [`Clock`] that only moves when the test moves it.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Clock starting at `start`.
    #[must_use]
    pub const fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Jump to an absolute instant. Moving backwards is allowed.
    pub fn set(&self, to: DateTime<Utc>) {
        *self.lock() = to;
    }

    /// Move forward by `by`.
    pub fn advance(&self, by: Duration) {
        let delta = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
        let mut now = self.lock();
        *now = now.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC);
    }

    #[allow(clippy::unwrap_used)] // Test double: mutex poisoning is a test failure
    fn lock(&self) -> std::sync::MutexGuard<'_, DateTime<Utc>> {
        self.now.lock().unwrap()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        let start = DateTime::from_timestamp(DEFAULT_START_SECONDS, 0).unwrap_or_else(Utc::now);
        Self::new(start)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.lock()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[test]
    fn stands_still_until_advanced() {
        let clock = ManualClock::default();
        let first = clock.now();
        let second = clock.now();
        assert_eq!(first, second);

        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.now() - first, chrono::Duration::seconds(90));
    }

    #[test]
    fn set_jumps_to_the_given_instant() {
        let clock = ManualClock::default();
        let target = clock.now() - chrono::Duration::days(1);
        clock.set(target);
        assert_eq!(clock.now(), target);
    }
}
