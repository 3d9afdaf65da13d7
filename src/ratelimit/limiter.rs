//! Core rate limiter implementation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace, warn};

use super::decision::{Admission, Decision};
use super::key::ClientKey;
use super::policy::FailurePolicy;
use crate::store::{CounterStore, StoreError};

/// Default window length when none is configured.
const DEFAULT_WINDOW_SECONDS: u64 = 60;
/// Default admits per window when none is configured.
const DEFAULT_MAX_REQUESTS: u64 = 3;
/// Default deadline for a single counter store call.
const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(1);

/// Limits applied to every client key. Fixed for the limiter's lifetime.
#[derive(Debug, Clone)]
pub struct LimiterSettings {
    /// Length of each key's window, counted from its first request
    pub window_seconds: u64,
    /// Admits allowed per window
    pub max_requests: u64,
    /// Decision to enforce when the counter store fails
    pub failure_policy: FailurePolicy,
    /// Deadline for each counter store call
    pub store_timeout: Duration,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            window_seconds: DEFAULT_WINDOW_SECONDS,
            max_requests: DEFAULT_MAX_REQUESTS,
            failure_policy: FailurePolicy::default(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }
}

impl LimiterSettings {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

/// Fixed-window admission control over a shared counter store.
///
/// The limiter keeps no mutable state of its own; all counting happens in
/// the store, so any number of tasks (or processes sharing the same store)
/// can call [`RateLimiter::admit`] concurrently.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    settings: LimiterSettings,
}

impl RateLimiter {
    /// Create a new rate limiter over `store`.
    pub fn new(store: Arc<dyn CounterStore>, settings: LimiterSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &LimiterSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    /// Decide whether a request from `key` may proceed.
    ///
    /// Store failures never escape: they are logged and resolved through
    /// the configured [`FailurePolicy`], with the error attached to the
    /// returned [`Admission`].
    pub async fn admit(&self, key: &ClientKey) -> Admission {
        trace!(client = %key, "Checking rate limit");

        match self.check(&key.storage_key()).await {
            Ok(admission) => admission,
            Err(error) => {
                let policy = self.settings.failure_policy;
                let decision = policy.fallback(self.settings.window_seconds);
                warn!(
                    client = %key,
                    error = %error,
                    policy = %policy,
                    allowed = decision.is_allowed(),
                    "Counter store failed, applying failure policy"
                );
                Admission::degraded(decision, error)
            }
        }
    }

    async fn check(&self, storage_key: &str) -> Result<Admission, StoreError> {
        let max_requests = self.settings.max_requests;
        let deny = Decision::Deny {
            retry_after_secs: self.settings.window_seconds,
        };

        // Reads have no side effect, so they are simply dropped on timeout.
        let current = tokio::time::timeout(self.settings.store_timeout, self.store.get(storage_key))
            .await
            .map_err(|_| self.timed_out("get"))??;

        // Exhausted windows are rejected without touching the counter.
        if let Some(count) = current.filter(|&count| count >= max_requests) {
            debug!(key = %storage_key, count, limit = max_requests, "Rate limit exceeded");
            return Ok(Admission::counted(deny, count));
        }

        let key = storage_key.to_string();
        let window = self.settings.window();
        let count = self
            .detached("increment", move |store| async move {
                store.increment_in_window(&key, window).await
            })
            .await?;

        if count <= max_requests {
            trace!(key = %storage_key, count, limit = max_requests, "Request admitted");
            Ok(Admission::counted(Decision::Allow, count))
        } else {
            // Lost a race against concurrent requests that read the same
            // pre-increment count.
            debug!(key = %storage_key, count, limit = max_requests, "Rate limit exceeded");
            Ok(Admission::counted(deny, count))
        }
    }

    /// Run a store call on its own task under the per-call deadline.
    ///
    /// The task is not aborted when the deadline passes or when the caller
    /// goes away, so an increment that reached the store always completes.
    /// The store's own command timeout bounds how long such a task lives.
    async fn detached<T, F, Fut>(&self, op: &'static str, call: F) -> Result<T, StoreError>
    where
        F: FnOnce(Arc<dyn CounterStore>) -> Fut,
        Fut: Future<Output = Result<T, StoreError>> + Send + 'static,
        T: Send + 'static,
    {
        let task = tokio::spawn(call(Arc::clone(&self.store)));
        match tokio::time::timeout(self.settings.store_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(StoreError::Unavailable(format!(
                "{op} task failed: {join_error}"
            ))),
            Err(_) => Err(self.timed_out(op)),
        }
    }

    fn timed_out(&self, op: &str) -> StoreError {
        StoreError::Unavailable(format!("{op} timed out after {:?}", self.settings.store_timeout))
    }
}
