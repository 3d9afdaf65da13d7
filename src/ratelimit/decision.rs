//! Admission decisions handed to the HTTP layer.

use crate::store::StoreError;

/// Whether a request may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Pass the request on to its handler.
    Allow,
    /// Reject the request; the client may retry after at most this many seconds.
    Deny { retry_after_secs: u64 },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// The outcome of one `admit` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    /// The decision to enforce.
    pub decision: Decision,
    /// Counter value observed while deciding. Absent when the store failed.
    pub count: Option<u64>,
    /// Set when the decision came from the failure policy rather than the
    /// counter. Advisory only.
    pub store_error: Option<StoreError>,
}

impl Admission {
    pub(crate) fn counted(decision: Decision, count: u64) -> Self {
        Self {
            decision,
            count: Some(count),
            store_error: None,
        }
    }

    pub(crate) fn degraded(decision: Decision, error: StoreError) -> Self {
        Self {
            decision,
            count: None,
            store_error: Some(error),
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.decision.is_allowed()
    }

    /// Admits left in the current window, when the count is known.
    pub fn remaining(&self, max_requests: u64) -> Option<u64> {
        self.count.map(|count| max_requests.saturating_sub(count))
    }
}
