//! What to decide when the counter store cannot answer.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::decision::Decision;

/// Behavior on counter store failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FailurePolicy {
    /// Admit the request.
    #[default]
    Open,
    /// Reject the request.
    Closed,
}

impl FailurePolicy {
    /// The decision to enforce while the store is failing.
    pub fn fallback(&self, retry_after_secs: u64) -> Decision {
        match self {
            FailurePolicy::Open => Decision::Allow,
            FailurePolicy::Closed => Decision::Deny { retry_after_secs },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePolicy::Open => "open",
            FailurePolicy::Closed => "closed",
        }
    }
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(FailurePolicy::Open),
            "closed" => Ok(FailurePolicy::Closed),
            other => Err(format!(
                "unknown failure policy {other:?}, expected \"open\" or \"closed\""
            )),
        }
    }
}

impl TryFrom<String> for FailurePolicy {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FailurePolicy> for String {
    fn from(policy: FailurePolicy) -> Self {
        policy.as_str().to_string()
    }
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_policy() {
        assert_eq!("open".parse::<FailurePolicy>(), Ok(FailurePolicy::Open));
        assert_eq!("Closed".parse::<FailurePolicy>(), Ok(FailurePolicy::Closed));
        assert!("maybe".parse::<FailurePolicy>().is_err());
    }

    #[test]
    fn test_fallback() {
        assert_eq!(FailurePolicy::Open.fallback(60), Decision::Allow);
        assert_eq!(
            FailurePolicy::Closed.fallback(60),
            Decision::Deny { retry_after_secs: 60 }
        );
    }

    #[test]
    fn test_serde_round_trip() {
        let json = serde_json::to_string(&FailurePolicy::Closed).unwrap();
        assert_eq!(json, "\"closed\"");
        let policy: FailurePolicy = serde_json::from_str("\"OPEN\"").unwrap();
        assert_eq!(policy, FailurePolicy::Open);
    }
}
