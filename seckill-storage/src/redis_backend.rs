//! Redis-backed shared store (cargo feature `redis`).
//!
//! Plain commands cover get/set/incr. Every read-modify-write that must not
//! interleave with other clients (unlock, reserve, cancel) runs as a Lua
//! script, which Redis executes atomically.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{RedisError, Script};
use seckill_core::{
    ReservationOutcome, SeckillError, SeckillResult, StoreError, UserId, VoucherId,
};
use tracing::debug;

use crate::keys::{order_set_key, stock_key};
use crate::shared::SharedStore;

const UNLOCK_SCRIPT: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
end
return 0
"#;

const RESERVE_SCRIPT: &str = r#"
if redis.call('sismember', KEYS[2], ARGV[1]) == 1 then
    return 2
end
local stock = tonumber(redis.call('get', KEYS[1]))
if stock == nil or stock <= 0 then
    return 1
end
redis.call('incrby', KEYS[1], -1)
redis.call('sadd', KEYS[2], ARGV[1])
return 0
"#;

const CANCEL_SCRIPT: &str = r#"
if redis.call('srem', KEYS[2], ARGV[1]) == 0 then
    return 0
end
redis.call('incrby', KEYS[1], 1)
return 1
"#;

/// Shared store on a Redis server.
#[derive(Clone)]
pub struct RedisSharedStore {
    conn: ConnectionManager,
    unlock: Script,
    reserve: Script,
    cancel: Script,
}

impl RedisSharedStore {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(url: &str) -> SeckillResult<Self> {
        let client = redis::Client::open(url).map_err(transient("connect"))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(transient("connect"))?;
        debug!(url = %url, "connected to redis shared store");
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self {
            conn,
            unlock: Script::new(UNLOCK_SCRIPT),
            reserve: Script::new(RESERVE_SCRIPT),
            cancel: Script::new(CANCEL_SCRIPT),
        }
    }

    /// The underlying connection, for components sharing the server.
    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

fn transient(operation: &'static str) -> impl Fn(RedisError) -> SeckillError {
    move |e| StoreError::transient(operation, e).into()
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl SharedStore for RedisSharedStore {
    async fn get(&self, key: &str) -> SeckillResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(transient("GET"))?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> SeckillResult<()> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let _: () = cmd.query_async(&mut conn).await.map_err(transient("SET"))?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> SeckillResult<bool> {
        let mut conn = self.conn.clone();
        // SET key value NX PX ttl
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(transient("SET NX"))?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> SeckillResult<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(transient("DEL"))?;
        Ok(removed > 0)
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> SeckillResult<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = self
            .unlock
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(transient("unlock script"))?;
        Ok(removed == 1)
    }

    async fn increment(&self, key: &str) -> SeckillResult<i64> {
        let mut conn = self.conn.clone();
        let value: i64 = redis::cmd("INCR")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(transient("INCR"))?;
        Ok(value)
    }

    async fn reserve_stock(
        &self,
        voucher_id: VoucherId,
        user_id: UserId,
    ) -> SeckillResult<ReservationOutcome> {
        let mut conn = self.conn.clone();
        let code: i64 = self
            .reserve
            .key(stock_key(voucher_id))
            .key(order_set_key(voucher_id))
            .arg(user_id.get())
            .invoke_async(&mut conn)
            .await
            .map_err(transient("reserve script"))?;
        ReservationOutcome::from_code(code).ok_or_else(|| {
            StoreError::CorruptValue {
                key: stock_key(voucher_id),
                reason: format!("reserve script returned unknown code {code}"),
            }
            .into()
        })
    }

    async fn release_reservation(
        &self,
        voucher_id: VoucherId,
        user_id: UserId,
    ) -> SeckillResult<bool> {
        let mut conn = self.conn.clone();
        let released: i64 = self
            .cancel
            .key(stock_key(voucher_id))
            .key(order_set_key(voucher_id))
            .arg(user_id.get())
            .invoke_async(&mut conn)
            .await
            .map_err(transient("cancel script"))?;
        Ok(released == 1)
    }
}

impl std::fmt::Debug for RedisSharedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisSharedStore").finish_non_exhaustive()
    }
}
