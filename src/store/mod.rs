//! Shared counter storage with per-key expiry.
//!
//! The rate limiter never holds counters itself; every read and write goes
//! through a [`CounterStore`]. Correctness under concurrency (across tasks
//! and across process instances) rests entirely on the atomicity of the
//! store's increment.

mod memory;
mod redis;

pub use self::memory::MemoryCounterStore;
pub use self::redis::RedisCounterStore;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Longest TTL a counter may be given, one year.
pub const MAX_TTL_SECS: u64 = 365 * 24 * 60 * 60;

/// Errors returned by counter store operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached: refused or dropped connection, I/O
    /// failure, or a call that exceeded its deadline.
    #[error("counter store unavailable: {0}")]
    Unavailable(String),

    /// The store answered, but not with something we can use.
    #[error("counter store protocol error: {0}")]
    Protocol(String),
}

impl StoreError {
    /// Whether this error is a reachability failure rather than a bad reply.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// A network-accessible counter store with per-key expiry.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Snapshot read of a counter. `None` when the key is absent or expired.
    async fn get(&self, key: &str) -> Result<Option<u64>, StoreError>;

    /// Unconditionally write `value` and give the key a fresh `ttl`.
    async fn set_with_expiry(&self, key: &str, value: u64, ttl: Duration) -> Result<(), StoreError>;

    /// Atomically increment a counter and return the new value.
    ///
    /// An absent key is created with value 1 and no expiry.
    async fn increment_and_get(&self, key: &str) -> Result<u64, StoreError>;

    /// Set the key's time-to-live. Returns `false` when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Count one hit against a fixed window of length `ttl`.
    ///
    /// The TTL is applied only by the increment that creates the counter,
    /// so later hits never extend the window. Backends should override this
    /// to make the pair a single atomic step and to give a counter left
    /// without an expiry its window back.
    async fn increment_in_window(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let count = self.increment_and_get(key).await?;
        if count == 1 {
            self.expire(key, ttl).await?;
        }
        Ok(count)
    }
}

/// Whole seconds for a TTL. Zero, sub-second and over-long TTLs are rejected
/// before anything is written.
pub(crate) fn ttl_secs(ttl: Duration) -> Result<u64, StoreError> {
    match ttl.as_secs() {
        0 => Err(StoreError::Protocol(format!("invalid expire time {ttl:?}"))),
        secs if secs > MAX_TTL_SECS => Err(StoreError::Protocol(format!(
            "expire time {secs}s exceeds the {MAX_TTL_SECS}s limit"
        ))),
        secs => Ok(secs),
    }
}
