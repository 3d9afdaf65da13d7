//! Redis-backed counter store.

use std::time::Duration;

use ::redis::aio::{ConnectionManager, ConnectionManagerConfig};
use ::redis::{AsyncCommands, RedisError, Script};
use async_trait::async_trait;
use tracing::{debug, info};

use super::{ttl_secs, CounterStore, StoreError};
use crate::config::StoreConfig;

/// Increments a counter and starts its window when this hit created it, or
/// when the counter was somehow left without an expiry.
const INCREMENT_IN_WINDOW: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 or redis.call('TTL', KEYS[1]) == -1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

/// A counter store speaking to a Redis server.
///
/// Holds a [`ConnectionManager`], a multiplexed connection that reconnects
/// on its own after the server drops it. Cloning the manager is cheap; each
/// call works on its own handle so concurrent requests never serialize on a
/// lock here.
#[derive(Clone)]
pub struct RedisCounterStore {
    connection: ConnectionManager,
    script: Script,
    url: String,
}

impl std::fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("url", &self.url)
            .finish()
    }
}

impl RedisCounterStore {
    /// Connect to the server described by `config`.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        Self::open(config.redis_url(), config.command_timeout).await
    }

    /// Connect to `url`. Connecting and every command reply are bounded by
    /// `timeout`, so no call can outlive it by much.
    pub async fn open(url: String, timeout: Duration) -> Result<Self, StoreError> {
        info!(url = %url, timeout = ?timeout, "Connecting to Redis counter store");

        let client = ::redis::Client::open(url.as_str()).map_err(map_redis_error)?;
        let manager_config = ConnectionManagerConfig::new()
            .set_connection_timeout(timeout)
            .set_response_timeout(timeout);
        let connection = client
            .get_connection_manager_with_config(manager_config)
            .await
            .map_err(map_redis_error)?;

        info!(url = %url, "Redis counter store connected");
        Ok(Self {
            connection,
            script: Script::new(INCREMENT_IN_WINDOW),
            url,
        })
    }

    /// Release the connection.
    ///
    /// Other clones of this store keep the underlying connection alive until
    /// they are dropped as well.
    pub async fn close(self) {
        info!(url = %self.url, "Closing Redis counter store");
        drop(self.connection);
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn get(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = conn.get(key).await.map_err(map_redis_error)?;
        raw.map(|value| parse_count(key, &value)).transpose()
    }

    async fn set_with_expiry(&self, key: &str, value: u64, ttl: Duration) -> Result<(), StoreError> {
        let secs = ttl_secs(ttl)?;
        let mut conn = self.connection.clone();
        let _: () = conn
            .set_ex(key, value, secs)
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }

    async fn increment_and_get(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.connection.clone();
        let count: i64 = conn.incr(key, 1).await.map_err(map_redis_error)?;
        non_negative(key, count)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let secs = ttl_secs(ttl)?;
        let secs = i64::try_from(secs)
            .map_err(|_| StoreError::Protocol(format!("expire time {secs}s out of range")))?;
        let mut conn = self.connection.clone();
        let applied: bool = conn.expire(key, secs).await.map_err(map_redis_error)?;
        Ok(applied)
    }

    async fn increment_in_window(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let secs = ttl_secs(ttl)?;
        let mut conn = self.connection.clone();
        let count: i64 = self
            .script
            .key(key)
            .arg(secs)
            .invoke_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        debug!(key = %key, count, "Counted hit in window");
        non_negative(key, count)
    }
}

fn parse_count(key: &str, value: &str) -> Result<u64, StoreError> {
    let count: i64 = value
        .parse()
        .map_err(|_| StoreError::Protocol(format!("counter {key} holds non-integer value {value:?}")))?;
    non_negative(key, count)
}

fn non_negative(key: &str, count: i64) -> Result<u64, StoreError> {
    u64::try_from(count)
        .map_err(|_| StoreError::Protocol(format!("counter {key} is negative ({count})")))
}

/// Sort a driver error into reachability versus protocol failure.
fn map_redis_error(err: RedisError) -> StoreError {
    if err.is_io_error()
        || err.is_timeout()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
    {
        StoreError::Unavailable(err.to_string())
    } else {
        StoreError::Protocol(err.to_string())
    }
}
