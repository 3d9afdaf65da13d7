//! Client key generation and handling.

use std::net::IpAddr;

/// Namespace for counter keys in the shared store.
const KEY_PREFIX: &str = "rate_limit";

/// Identifies the caller a counter belongs to.
///
/// Keys compare as plain, case-sensitive strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey(String);

impl ClientKey {
    /// Create a client key from an arbitrary identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Create a client key from a peer address.
    ///
    /// IPv4 clients reaching a dual-stack listener show up as IPv4-mapped
    /// IPv6 addresses; those are folded back so one client maps to one key.
    pub fn from_ip(ip: IpAddr) -> Self {
        Self(ip.to_canonical().to_string())
    }

    /// The bare identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The key the counter is stored under: `rate_limit:<id>`.
    pub fn storage_key(&self) -> String {
        format!("{}:{}", KEY_PREFIX, self.0)
    }
}

impl std::fmt::Display for ClientKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
