//! Environment-driven configuration.
//!
//! Everything has a default tuned for local development; deployments
//! override through `HOTDROP_*` variables. Unparsable values fall back to
//! the default rather than failing startup.
//!
//! | variable                        | default                  |
//! |---------------------------------|--------------------------|
//! | `HOTDROP_REDIS_URL`             | `redis://127.0.0.1:6379` |
//! | `HOTDROP_STREAM`                | `hotdrop:reservations`   |
//! | `HOTDROP_GROUP`                 | `fulfillment`            |
//! | `HOTDROP_CONSUMER_PREFIX`       | `fulfiller`              |
//! | `HOTDROP_WORKERS`               | `1`                      |
//! | `HOTDROP_BLOCK_TIMEOUT_MS`      | `2000`                   |
//! | `HOTDROP_ORDER_LOCK_LEASE_MS`   | `10000`                  |
//! | `HOTDROP_RECOVERY_BACKOFF_MS`   | `1000`                   |
//! | `HOTDROP_CACHE_TTL_SECS`        | `1800`                   |
//! | `HOTDROP_CACHE_NULL_TTL_SECS`   | `120`                    |
//! | `HOTDROP_REBUILD_LOCK_LEASE_MS` | `10000`                  |
//! | `HOTDROP_MUTEX_RETRY_MS`        | `50`                     |
//! | `HOTDROP_REBUILD_WORKERS`       | `10`                     |
//! | `HOTDROP_REBUILD_QUEUE_DEPTH`   | `64`                     |

use crate::keys;
use std::env;
use std::time::Duration;

const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_CONSUMER_PREFIX: &str = "fulfiller";
const DEFAULT_WORKERS: usize = 1;
const DEFAULT_BLOCK_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_ORDER_LOCK_LEASE_MS: u64 = 10_000;
const DEFAULT_RECOVERY_BACKOFF_MS: u64 = 1_000;
const DEFAULT_CACHE_TTL_SECS: u64 = 1_800;
const DEFAULT_CACHE_NULL_TTL_SECS: u64 = 120;
const DEFAULT_REBUILD_LOCK_LEASE_MS: u64 = 10_000;
const DEFAULT_MUTEX_RETRY_MS: u64 = 50;
const DEFAULT_REBUILD_WORKERS: usize = 10;
const DEFAULT_REBUILD_QUEUE_DEPTH: usize = 64;

/// Top-level configuration.
#[derive(Debug, Clone, Default)]
pub struct HotdropConfig {
    /// Coordination store connection.
    pub redis: RedisConfig,
    /// Fulfillment worker pool.
    pub fulfillment: FulfillmentConfig,
    /// Cache client.
    pub cache: CacheConfig,
}

impl HotdropConfig {
    /// Read configuration from the environment, defaulting field by field.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            redis: RedisConfig::from_env(),
            fulfillment: FulfillmentConfig::from_env(),
            cache: CacheConfig::from_env(),
        }
    }
}

/// Coordination store connection settings.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Connection URL.
    pub url: String,
}

impl RedisConfig {
    fn from_env() -> Self {
        Self {
            url: env::var("HOTDROP_REDIS_URL").unwrap_or_else(|_| DEFAULT_REDIS_URL.to_string()),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_REDIS_URL.to_string(),
        }
    }
}

/// Fulfillment worker pool settings.
#[derive(Debug, Clone)]
pub struct FulfillmentConfig {
    /// Reservation log stream name.
    pub stream: String,
    /// Consumer group name.
    pub group: String,
    /// Prefix for worker consumer names (`{prefix}-{n}`). Keep it stable
    /// across restarts or pending entries are orphaned.
    pub consumer_prefix: String,
    /// Number of workers.
    pub workers: usize,
    /// Blocking-read timeout while live.
    pub block_timeout: Duration,
    /// Lease on the per-user order lock.
    pub order_lock_lease: Duration,
    /// Pause between replay attempts while recovering.
    pub recovery_backoff: Duration,
}

impl FulfillmentConfig {
    fn from_env() -> Self {
        Self {
            stream: env::var("HOTDROP_STREAM")
                .unwrap_or_else(|_| keys::RESERVATION_STREAM.to_string()),
            group: env::var("HOTDROP_GROUP")
                .unwrap_or_else(|_| keys::FULFILLMENT_GROUP.to_string()),
            consumer_prefix: env::var("HOTDROP_CONSUMER_PREFIX")
                .unwrap_or_else(|_| DEFAULT_CONSUMER_PREFIX.to_string()),
            workers: env_parsed("HOTDROP_WORKERS", DEFAULT_WORKERS),
            block_timeout: env_millis("HOTDROP_BLOCK_TIMEOUT_MS", DEFAULT_BLOCK_TIMEOUT_MS),
            order_lock_lease: env_millis("HOTDROP_ORDER_LOCK_LEASE_MS", DEFAULT_ORDER_LOCK_LEASE_MS),
            recovery_backoff: env_millis("HOTDROP_RECOVERY_BACKOFF_MS", DEFAULT_RECOVERY_BACKOFF_MS),
        }
    }
}

impl Default for FulfillmentConfig {
    fn default() -> Self {
        Self {
            stream: keys::RESERVATION_STREAM.to_string(),
            group: keys::FULFILLMENT_GROUP.to_string(),
            consumer_prefix: DEFAULT_CONSUMER_PREFIX.to_string(),
            workers: DEFAULT_WORKERS,
            block_timeout: Duration::from_millis(DEFAULT_BLOCK_TIMEOUT_MS),
            order_lock_lease: Duration::from_millis(DEFAULT_ORDER_LOCK_LEASE_MS),
            recovery_backoff: Duration::from_millis(DEFAULT_RECOVERY_BACKOFF_MS),
        }
    }
}

/// Cache client settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Physical TTL for cached values.
    pub value_ttl: Duration,
    /// TTL for confirmed-missing sentinels.
    pub null_ttl: Duration,
    /// Lease on per-key rebuild locks.
    pub rebuild_lock_lease: Duration,
    /// Sleep between retries while another caller holds the rebuild lock.
    pub mutex_retry_interval: Duration,
    /// Workers in the asynchronous rebuild pool.
    pub rebuild_workers: usize,
    /// Queued rebuilds beyond which submissions are dropped.
    pub rebuild_queue_depth: usize,
}

impl CacheConfig {
    fn from_env() -> Self {
        Self {
            value_ttl: env_secs("HOTDROP_CACHE_TTL_SECS", DEFAULT_CACHE_TTL_SECS),
            null_ttl: env_secs("HOTDROP_CACHE_NULL_TTL_SECS", DEFAULT_CACHE_NULL_TTL_SECS),
            rebuild_lock_lease: env_millis(
                "HOTDROP_REBUILD_LOCK_LEASE_MS",
                DEFAULT_REBUILD_LOCK_LEASE_MS,
            ),
            mutex_retry_interval: env_millis("HOTDROP_MUTEX_RETRY_MS", DEFAULT_MUTEX_RETRY_MS),
            rebuild_workers: env_parsed("HOTDROP_REBUILD_WORKERS", DEFAULT_REBUILD_WORKERS),
            rebuild_queue_depth: env_parsed(
                "HOTDROP_REBUILD_QUEUE_DEPTH",
                DEFAULT_REBUILD_QUEUE_DEPTH,
            ),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            value_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            null_ttl: Duration::from_secs(DEFAULT_CACHE_NULL_TTL_SECS),
            rebuild_lock_lease: Duration::from_millis(DEFAULT_REBUILD_LOCK_LEASE_MS),
            mutex_retry_interval: Duration::from_millis(DEFAULT_MUTEX_RETRY_MS),
            rebuild_workers: DEFAULT_REBUILD_WORKERS,
            rebuild_queue_depth: DEFAULT_REBUILD_QUEUE_DEPTH,
        }
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_millis(name: &str, default: u64) -> Duration {
    Duration::from_millis(env_parsed(name, default))
}

fn env_secs(name: &str, default: u64) -> Duration {
    Duration::from_secs(env_parsed(name, default))
}
