//! Turnstile - Fixed-Window Admission Control
//!
//! This crate decides, per client, whether an inbound HTTP request may
//! proceed. Counters live in a shared store with per-key expiry (Redis in
//! production) so every instance of the service enforces the same quota.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod store;
