//! Error taxonomy for the pipeline.
//!
//! Business rejections (sold out, duplicate purchase, window violations) are
//! typed outcomes on the operations that produce them, never errors. The
//! variants here cover the rest: transient infrastructure failures abort the
//! current request and, on the fulfillment path, leave the message
//! un-acknowledged for replay; anomalies are logged and the offending
//! message is dropped.

use thiserror::Error;

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced by pipeline operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum Error {
    // ═══════════════════════════════════════════════════════════
    // Coordination store
    // ═══════════════════════════════════════════════════════════
    /// The coordination store could not be reached or rejected a command.
    #[error("Coordination store error: {0}")]
    Coordination(String),

    /// A reservation log entry carried fields that do not parse.
    #[error("Malformed log entry {entry_id}: {reason}")]
    MalformedEntry {
        /// Log position of the offending entry.
        entry_id: String,
        /// What failed to parse.
        reason: String,
    },

    // ═══════════════════════════════════════════════════════════
    // Durable storage
    // ═══════════════════════════════════════════════════════════
    /// Durable storage failed the current call.
    #[error("Durable storage error: {0}")]
    Storage(String),

    // ═══════════════════════════════════════════════════════════
    // Serialization
    // ═══════════════════════════════════════════════════════════
    /// A cached value or log payload could not be serialized or parsed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Whether retrying the operation can plausibly succeed.
    ///
    /// A fulfillment worker hitting a transient error leaves the current
    /// entry pending and replays it once the store answers again.
    ///
    /// # Examples
    ///
    /// ```
    /// use hotdrop_core::Error;
    ///
    /// assert!(Error::Coordination("connection reset".into()).is_transient());
    /// assert!(!Error::Serialization("bad envelope".into()).is_transient());
    /// ```
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Coordination(_) | Self::Storage(_))
    }

    /// Whether this is an invariant violation to log and drop.
    #[must_use]
    pub const fn is_anomaly(&self) -> bool {
        matches!(self, Self::MalformedEntry { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}
