//! In-memory coordination store double.
//!
//! Mirrors the Redis implementation closely enough for pipeline tests: the
//! reservation step runs atomically under one lock, delivered-but-unacked
//! entries sit on a per-consumer pending list exactly like a consumer
//! group's PEL, and TTL'd keys expire lazily against the injected clock.

use chrono::{DateTime, Utc};
use hotdrop_core::clock::{Clock, SystemClock};
use hotdrop_core::error::{Error, Result};
use hotdrop_core::keys;
use hotdrop_core::store::{CoordinationStore, EntryId, ReservationDelivery, ReserveStatus};
use hotdrop_core::types::ReservationMessage;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(2);

struct StringEntry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

struct LogRecord {
    id: EntryId,
    /// `None` marks a malformed entry whose fields would not parse.
    message: Option<ReservationMessage>,
}

#[derive(Default)]
struct GroupState {
    next_index: usize,
    pending: Vec<PendingRecord>,
}

struct PendingRecord {
    consumer: String,
    index: usize,
}

#[derive(Default)]
struct Inner {
    strings: HashMap<String, StringEntry>,
    sets: HashMap<String, HashSet<String>>,
    log: Vec<LogRecord>,
    groups: HashMap<String, GroupState>,
    sequence: u64,
}

impl Inner {
    /// Read a string key, dropping it first if its TTL has lapsed.
    fn live_string(&mut self, key: &str, now: DateTime<Utc>) -> Option<&StringEntry> {
        let expired = self
            .strings
            .get(key)
            .is_some_and(|entry| entry.expires_at.is_some_and(|at| at <= now));
        if expired {
            self.strings.remove(key);
        }
        self.strings.get(key)
    }

    fn allocate_entry_id(&mut self) -> EntryId {
        self.sequence += 1;
        EntryId::new(format!("{}-0", self.sequence))
    }
}

/// In-memory [`CoordinationStore`].
pub struct InMemoryCoordinationStore {
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl InMemoryCoordinationStore {
    /// Store running on the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Store whose TTLs follow `clock`.
    #[must_use]
    pub fn with_clock<C: Clock + 'static>(clock: Arc<C>) -> Self {
        Self {
            clock,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Append an entry whose fields will not parse, as a corrupted producer
    /// would.
    pub fn append_malformed(&self) {
        let mut inner = self.lock_inner();
        let id = inner.allocate_entry_id();
        inner.log.push(LogRecord { id, message: None });
    }

    /// Number of delivered-but-unacknowledged entries across `group`.
    #[must_use]
    pub fn pending_count(&self, group: &str) -> usize {
        self.lock_inner()
            .groups
            .get(group)
            .map_or(0, |state| state.pending.len())
    }

    /// Total entries ever appended to the reservation log.
    #[must_use]
    pub fn log_len(&self) -> usize {
        self.lock_inner().log.len()
    }

    #[allow(clippy::unwrap_used)] // Test double: mutex poisoning is a test failure
    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    fn poll_new(&self, group: &str, consumer: &str) -> Option<Result<ReservationDelivery>> {
        let mut guard = self.lock_inner();
        let inner = &mut *guard;
        let Some(state) = inner.groups.get_mut(group) else {
            return Some(Err(no_such_group(group)));
        };
        let index = state.next_index;
        if index >= inner.log.len() {
            return None;
        }
        state.next_index += 1;
        state.pending.push(PendingRecord {
            consumer: consumer.to_string(),
            index,
        });
        Some(deliver(&inner.log[index]))
    }
}

impl Default for InMemoryCoordinationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CoordinationStore for InMemoryCoordinationStore {
    async fn try_reserve(&self, message: &ReservationMessage) -> Result<ReserveStatus> {
        let now = self.clock.now();
        let mut inner = self.lock_inner();

        // Marker before stock: a prior winner keeps reading Duplicate even
        // after the counter hits zero.
        let marker_key = keys::purchasers_key(message.voucher_id);
        let user = message.user_id.to_string();
        if inner
            .sets
            .get(&marker_key)
            .is_some_and(|markers| markers.contains(&user))
        {
            return Ok(ReserveStatus::Duplicate);
        }

        let stock_key = keys::stock_key(message.voucher_id);
        let stock = inner
            .live_string(&stock_key, now)
            .and_then(|entry| entry.value.parse::<i64>().ok())
            .unwrap_or(0);
        if stock <= 0 {
            return Ok(ReserveStatus::SoldOut);
        }

        if let Some(entry) = inner.strings.get_mut(&stock_key) {
            entry.value = (stock - 1).to_string();
        }
        inner.sets.entry(marker_key).or_default().insert(user);
        let id = inner.allocate_entry_id();
        inner.log.push(LogRecord {
            id,
            message: Some(*message),
        });
        Ok(ReserveStatus::Reserved)
    }

    async fn ensure_group(&self, group: &str) -> Result<()> {
        self.lock_inner().groups.entry(group.to_string()).or_default();
        Ok(())
    }

    async fn read_new(
        &self,
        group: &str,
        consumer: &str,
        block: Duration,
    ) -> Result<Option<ReservationDelivery>> {
        let deadline = tokio::time::Instant::now() + block;
        loop {
            if let Some(polled) = self.poll_new(group, consumer) {
                return polled.map(Some);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn read_pending(
        &self,
        group: &str,
        consumer: &str,
    ) -> Result<Option<ReservationDelivery>> {
        let mut guard = self.lock_inner();
        let inner = &mut *guard;
        let Some(state) = inner.groups.get_mut(group) else {
            return Err(no_such_group(group));
        };
        let Some(record) = state
            .pending
            .iter()
            .find(|pending| pending.consumer == consumer)
        else {
            return Ok(None);
        };
        deliver(&inner.log[record.index]).map(Some)
    }

    async fn ack(&self, group: &str, entry_id: &EntryId) -> Result<()> {
        let mut guard = self.lock_inner();
        let inner = &mut *guard;
        let Some(state) = inner.groups.get_mut(group) else {
            return Err(no_such_group(group));
        };
        let log = &inner.log;
        state.pending.retain(|pending| log[pending.index].id != *entry_id);
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let now = self.clock.now();
        let mut inner = self.lock_inner();
        if inner.live_string(key, now).is_some() {
            return Ok(false);
        }
        inner.strings.insert(
            key.to_string(),
            StringEntry {
                value: value.to_string(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool> {
        let now = self.clock.now();
        let mut inner = self.lock_inner();
        let matches = inner
            .live_string(key, now)
            .is_some_and(|entry| entry.value == expected);
        if matches {
            inner.strings.remove(key);
        }
        Ok(matches)
    }

    async fn increment(&self, key: &str) -> Result<u64> {
        let now = self.clock.now();
        let mut inner = self.lock_inner();
        let (current, expires_at) = match inner.live_string(key, now) {
            Some(entry) => (
                entry.value.parse::<u64>().ok().unwrap_or(0),
                entry.expires_at,
            ),
            None => (0, None),
        };
        let next = current + 1;
        inner.strings.insert(
            key.to_string(),
            StringEntry {
                value: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = self.clock.now();
        let mut inner = self.lock_inner();
        Ok(inner.live_string(key, now).map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let now = self.clock.now();
        let mut inner = self.lock_inner();
        inner.strings.insert(
            key.to_string(),
            StringEntry {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| now + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.lock_inner().strings.remove(key);
        Ok(())
    }
}

fn no_such_group(group: &str) -> Error {
    Error::Coordination(format!("no such consumer group: {group}"))
}

fn deliver(record: &LogRecord) -> Result<ReservationDelivery> {
    match record.message {
        Some(message) => Ok(ReservationDelivery {
            entry_id: record.id.clone(),
            message,
        }),
        None => Err(Error::MalformedEntry {
            entry_id: record.id.as_str().to_string(),
            reason: "entry fields do not parse".to_string(),
        }),
    }
}
