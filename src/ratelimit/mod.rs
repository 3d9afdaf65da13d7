//! Admission control: fixed-window rate limiting over a shared counter store.

mod decision;
mod key;
mod limiter;
mod policy;

pub use decision::{Admission, Decision};
pub use key::ClientKey;
pub use limiter::{LimiterSettings, RateLimiter};
pub use policy::FailurePolicy;
