//! In-process counter store.
//!
//! Counters live in a sharded map and expire against [`tokio::time::Instant`],
//! so paused-clock tests can move windows forward with `tokio::time::advance`.
//! State is not shared between processes; use [`super::RedisCounterStore`]
//! when running more than one instance.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use super::{ttl_secs, CounterStore, StoreError};

#[derive(Debug, Clone, Copy)]
struct Counter {
    count: u64,
    expires_at: Option<Instant>,
}

impl Counter {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

fn deadline(now: Instant, secs: u64) -> Result<Instant, StoreError> {
    now.checked_add(Duration::from_secs(secs))
        .ok_or_else(|| StoreError::Protocol(format!("expire time {secs}s out of range")))
}

/// A counter store backed by a concurrent hash map.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    counters: DashMap<String, Counter>,
}

impl MemoryCounterStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remaining lifetime of a counter, if it exists and has an expiry.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.counters
            .get(key)
            .filter(|c| !c.is_expired(now))
            .and_then(|c| c.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    /// Drop every expired counter. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.counters.len();
        self.counters.retain(|_, c| !c.is_expired(now));
        let removed = before.saturating_sub(self.counters.len());
        if removed > 0 {
            debug!(removed, "Purged expired counters");
        }
        removed
    }

    /// Number of counters currently held, expired or not.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let now = Instant::now();
        Ok(self
            .counters
            .get(key)
            .filter(|c| !c.is_expired(now))
            .map(|c| c.count))
    }

    async fn set_with_expiry(&self, key: &str, value: u64, ttl: Duration) -> Result<(), StoreError> {
        let expires_at = deadline(Instant::now(), ttl_secs(ttl)?)?;
        self.counters.insert(
            key.to_string(),
            Counter {
                count: value,
                expires_at: Some(expires_at),
            },
        );
        Ok(())
    }

    async fn increment_and_get(&self, key: &str) -> Result<u64, StoreError> {
        let now = Instant::now();
        match self.counters.entry(key.to_string()) {
            Entry::Occupied(mut slot) => {
                let counter = slot.get_mut();
                if counter.is_expired(now) {
                    *counter = Counter { count: 1, expires_at: None };
                } else {
                    counter.count = counter
                        .count
                        .checked_add(1)
                        .ok_or_else(|| StoreError::Protocol(format!("counter {key} overflowed")))?;
                }
                Ok(counter.count)
            }
            Entry::Vacant(slot) => {
                slot.insert(Counter { count: 1, expires_at: None });
                Ok(1)
            }
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        let expires_at = deadline(now, ttl_secs(ttl)?)?;
        match self.counters.get_mut(key) {
            Some(mut counter) if !counter.is_expired(now) => {
                counter.expires_at = Some(expires_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn increment_in_window(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let now = Instant::now();
        let expires_at = deadline(now, ttl_secs(ttl)?)?;

        let mut counter = self
            .counters
            .entry(key.to_string())
            .or_insert(Counter { count: 0, expires_at: None });
        if counter.is_expired(now) {
            *counter = Counter { count: 0, expires_at: None };
        }
        counter.count = counter
            .count
            .checked_add(1)
            .ok_or_else(|| StoreError::Protocol(format!("counter {key} overflowed")))?;
        // Also picks up counters that were created without an expiry.
        if counter.expires_at.is_none() {
            counter.expires_at = Some(expires_at);
        }
        Ok(counter.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    const WINDOW: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn test_get_absent_key() {
        let store = MemoryCounterStore::new();
        assert_eq!(store.get("rate_limit:nobody").await, Ok(None));
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_with_expiry_then_expires() {
        let store = MemoryCounterStore::new();
        assert_ok!(store.set_with_expiry("k", 1, WINDOW).await);
        assert_eq!(store.get("k").await, Ok(Some(1)));
        assert_eq!(store.ttl("k"), Some(WINDOW));

        tokio::time::advance(WINDOW).await;
        assert_eq!(store.get("k").await, Ok(None));
        assert_eq!(store.ttl("k"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_ttl_rejected() {
        let store = MemoryCounterStore::new();
        let err = assert_err!(store.set_with_expiry("k", 1, Duration::ZERO).await);
        assert!(!err.is_unavailable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_increment_creates_without_expiry() {
        let store = MemoryCounterStore::new();
        assert_eq!(store.increment_and_get("k").await, Ok(1));
        assert_eq!(store.increment_and_get("k").await, Ok(2));
        assert_eq!(store.ttl("k"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_increment_preserves_ttl() {
        let store = MemoryCounterStore::new();
        assert_ok!(store.set_with_expiry("k", 1, WINDOW).await);

        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(store.increment_and_get("k").await, Ok(2));
        assert_eq!(store.ttl("k"), Some(Duration::from_secs(40)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_missing_key() {
        let store = MemoryCounterStore::new();
        assert_eq!(store.expire("k", WINDOW).await, Ok(false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_increment_in_window_sets_ttl_once() {
        let store = MemoryCounterStore::new();
        assert_eq!(store.increment_in_window("k", WINDOW).await, Ok(1));
        assert_eq!(store.ttl("k"), Some(WINDOW));

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(store.increment_in_window("k", WINDOW).await, Ok(2));
        // Window is anchored at the first hit, not refreshed.
        assert_eq!(store.ttl("k"), Some(Duration::from_secs(30)));

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(store.increment_in_window("k", WINDOW).await, Ok(1));
        assert_eq!(store.ttl("k"), Some(WINDOW));
    }

    #[tokio::test(start_paused = true)]
    async fn test_increment_in_window_restores_missing_expiry() {
        let store = MemoryCounterStore::new();
        assert_eq!(store.increment_and_get("k").await, Ok(1));
        assert_eq!(store.ttl("k"), None);

        assert_eq!(store.increment_in_window("k", WINDOW).await, Ok(2));
        assert_eq!(store.ttl("k"), Some(WINDOW));

        tokio::time::advance(WINDOW).await;
        assert_eq!(store.get("k").await, Ok(None));
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_ttl_writes_nothing() {
        let huge = Duration::from_secs(u64::MAX);

        let store = MemoryCounterStore::new();
        let err = assert_err!(store.increment_in_window("k", huge).await);
        assert!(matches!(err, StoreError::Protocol(_)));
        assert!(store.is_empty());

        assert_err!(store.set_with_expiry("k", 1, huge).await);
        assert!(store.is_empty());

        assert_eq!(store.increment_and_get("k").await, Ok(1));
        assert_err!(store.expire("k", huge).await);
        assert_eq!(store.ttl("k"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let store = MemoryCounterStore::new();
        assert_ok!(store.set_with_expiry("short", 1, Duration::from_secs(5)).await);
        assert_ok!(store.set_with_expiry("long", 1, WINDOW).await);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("long").await, Ok(Some(1)));
    }
}
