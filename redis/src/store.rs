//! Redis-backed coordination store.
//!
//! # Architecture
//!
//! - **Reservation step**: one Lua script over the stock counter, the
//!   purchaser set and the reservation stream. Redis runs scripts
//!   single-threaded, which gives the step its atomicity.
//! - **Delivery**: `XREADGROUP` with a consumer group; delivered entries sit
//!   in the consumer's pending list until `XACK`, so a crashed worker's
//!   entries replay on restart.
//! - **Locks**: `SET NX PX` writes the token, a compare-and-delete script
//!   releases it.
//! - **Connection**: a [`ConnectionManager`] cloned per call, which
//!   multiplexes and reconnects on its own.

use hotdrop_core::error::{Error, Result};
use hotdrop_core::keys;
use hotdrop_core::store::{
    CoordinationStore, EntryId, ReservationDelivery, ReserveStatus,
};
use hotdrop_core::types::{OrderId, ReservationMessage, UserId, VoucherId};
use redis::aio::ConnectionManager;
use redis::streams::{StreamId, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Client, ExistenceCheck, Script, SetExpiry, SetOptions, Value};
use std::time::Duration;

/// The atomic reservation step.
///
/// KEYS: stock counter, purchaser set, reservation stream.
/// ARGV: order ID, user ID, voucher ID.
/// Returns 0 reserved, 1 sold out, 2 duplicate. The marker test runs before
/// the stock test so a prior winner keeps reading duplicate after sellout.
const RESERVE_SCRIPT: &str = r"
if redis.call('SISMEMBER', KEYS[2], ARGV[2]) == 1 then
    return 2
end
local stock = tonumber(redis.call('GET', KEYS[1]))
if stock == nil or stock <= 0 then
    return 1
end
redis.call('INCRBY', KEYS[1], -1)
redis.call('SADD', KEYS[2], ARGV[2])
redis.call('XADD', KEYS[3], '*', 'order_id', ARGV[1], 'user_id', ARGV[2], 'voucher_id', ARGV[3])
return 0
";

/// Token-checked lock release: delete KEYS[1] only while it holds ARGV[1].
const RELEASE_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
";

/// Redis-backed [`CoordinationStore`].
pub struct RedisCoordinationStore {
    /// Connection manager for connection pooling.
    conn_manager: ConnectionManager,
    /// Stream holding the reservation log.
    stream: String,
    reserve_script: Script,
    release_script: Script,
}

impl RedisCoordinationStore {
    /// Connect to Redis and bind the store to `stream`.
    ///
    /// # Errors
    ///
    /// [`Error::Coordination`](hotdrop_core::error::Error::Coordination)
    /// when the connection cannot be established.
    pub async fn connect(redis_url: &str, stream: impl Into<String>) -> Result<Self> {
        let client = Client::open(redis_url).map_err(|e| {
            Error::Coordination(format!("Failed to create Redis client: {e}"))
        })?;
        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            Error::Coordination(format!("Failed to create Redis connection manager: {e}"))
        })?;

        Ok(Self {
            conn_manager,
            stream: stream.into(),
            reserve_script: Script::new(RESERVE_SCRIPT),
            release_script: Script::new(RELEASE_SCRIPT),
        })
    }

    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        id: &str,
        block: Option<Duration>,
    ) -> Result<Option<ReservationDelivery>> {
        let mut conn = self.conn_manager.clone();
        let mut options = StreamReadOptions::default().group(group, consumer).count(1);
        if let Some(block) = block {
            // BLOCK 0 means block forever; the contract is a bounded wait.
            let millis = usize::try_from(block.as_millis()).unwrap_or(usize::MAX).max(1);
            options = options.block(millis);
        }

        // A timed-out BLOCK comes back as nil rather than an empty reply.
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[self.stream.as_str()], &[id], &options)
            .await
            .map_err(|e| Error::Coordination(format!("Failed to read reservation stream: {e}")))?;
        first_entry(reply)
    }
}

impl Clone for RedisCoordinationStore {
    fn clone(&self) -> Self {
        Self {
            conn_manager: self.conn_manager.clone(),
            stream: self.stream.clone(),
            reserve_script: self.reserve_script.clone(),
            release_script: self.release_script.clone(),
        }
    }
}

impl CoordinationStore for RedisCoordinationStore {
    async fn try_reserve(&self, message: &ReservationMessage) -> Result<ReserveStatus> {
        let mut conn = self.conn_manager.clone();
        let code: i64 = self
            .reserve_script
            .key(keys::stock_key(message.voucher_id))
            .key(keys::purchasers_key(message.voucher_id))
            .key(self.stream.as_str())
            .arg(message.order_id.value())
            .arg(message.user_id.value())
            .arg(message.voucher_id.value())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| Error::Coordination(format!("Failed to run reservation script: {e}")))?;
        decode_status(code)
    }

    async fn ensure_group(&self, group: &str) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        // Start the group at 0: entries appended before provisioning still
        // reach the workers.
        let created: redis::RedisResult<()> = conn
            .xgroup_create_mkstream(self.stream.as_str(), group, "0")
            .await;
        match created {
            Ok(()) => {
                tracing::info!(stream = %self.stream, group, "Created consumer group");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(Error::Coordination(format!(
                "Failed to create consumer group: {e}"
            ))),
        }
    }

    async fn read_new(
        &self,
        group: &str,
        consumer: &str,
        block: Duration,
    ) -> Result<Option<ReservationDelivery>> {
        self.read_group(group, consumer, ">", Some(block)).await
    }

    async fn read_pending(
        &self,
        group: &str,
        consumer: &str,
    ) -> Result<Option<ReservationDelivery>> {
        self.read_group(group, consumer, "0", None).await
    }

    async fn ack(&self, group: &str, entry_id: &EntryId) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: () = conn
            .xack(self.stream.as_str(), group, &[entry_id.as_str()])
            .await
            .map_err(|e| Error::Coordination(format!("Failed to acknowledge entry: {e}")))?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn_manager.clone();
        let options = SetOptions::default()
            .conditional_set(ExistenceCheck::NX)
            .with_expiration(SetExpiry::PX(
                u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1),
            ));
        let reply: Value = conn
            .set_options(key, value, options)
            .await
            .map_err(|e| Error::Coordination(format!("Failed to set key: {e}")))?;
        Ok(matches!(reply, Value::Okay))
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool> {
        let mut conn = self.conn_manager.clone();
        let deleted: i64 = self
            .release_script
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| Error::Coordination(format!("Failed to run release script: {e}")))?;
        Ok(deleted == 1)
    }

    async fn increment(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn_manager.clone();
        conn.incr(key, 1u64)
            .await
            .map_err(|e| Error::Coordination(format!("Failed to increment counter: {e}")))
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn_manager.clone();
        conn.get(key)
            .await
            .map_err(|e| Error::Coordination(format!("Failed to get key: {e}")))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        match ttl {
            Some(ttl) => {
                let _: () = conn
                    .set_ex(key, value, ttl.as_secs().max(1))
                    .await
                    .map_err(|e| Error::Coordination(format!("Failed to set key: {e}")))?;
            }
            None => {
                let _: () = conn
                    .set(key, value)
                    .await
                    .map_err(|e| Error::Coordination(format!("Failed to set key: {e}")))?;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: () = conn
            .del(key)
            .await
            .map_err(|e| Error::Coordination(format!("Failed to delete key: {e}")))?;
        Ok(())
    }
}

fn decode_status(code: i64) -> Result<ReserveStatus> {
    match code {
        0 => Ok(ReserveStatus::Reserved),
        1 => Ok(ReserveStatus::SoldOut),
        2 => Ok(ReserveStatus::Duplicate),
        other => Err(Error::Coordination(format!(
            "unexpected reservation script reply: {other}"
        ))),
    }
}

fn first_entry(reply: Option<StreamReadReply>) -> Result<Option<ReservationDelivery>> {
    let Some(reply) = reply else {
        return Ok(None);
    };
    let Some(entry) = reply
        .keys
        .into_iter()
        .next()
        .and_then(|key| key.ids.into_iter().next())
    else {
        return Ok(None);
    };
    parse_delivery(&entry).map(Some)
}

fn parse_delivery(entry: &StreamId) -> Result<ReservationDelivery> {
    let message = parse_message(entry).map_err(|reason| Error::MalformedEntry {
        entry_id: entry.id.clone(),
        reason,
    })?;
    Ok(ReservationDelivery {
        entry_id: EntryId::new(entry.id.clone()),
        message,
    })
}

fn parse_message(entry: &StreamId) -> std::result::Result<ReservationMessage, String> {
    Ok(ReservationMessage {
        order_id: OrderId::new(parse_field(entry, "order_id")?),
        user_id: UserId::new(parse_field(entry, "user_id")?),
        voucher_id: VoucherId::new(parse_field(entry, "voucher_id")?),
    })
}

fn parse_field(entry: &StreamId, field: &str) -> std::result::Result<u64, String> {
    let value: String = entry
        .get(field)
        .ok_or_else(|| format!("missing field {field}"))?;
    value
        .parse()
        .map_err(|_| format!("field {field} is not numeric: {value}"))
}
