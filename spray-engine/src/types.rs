//! Core data types for the spray engine

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use url::Url;

/// A username, unique within a run
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Wrap a username as-is
    pub fn new(username: impl Into<String>) -> Self {
        Self(username.into())
    }

    /// Build an identity, appending `@domain` when the username is bare
    pub fn qualified(username: &str, domain: &str) -> Self {
        let username = username.trim();
        if username.contains('@') || domain.is_empty() {
            Self(username.to_string())
        } else {
            Self(format!("{}@{}", username, domain))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Local part before the `@`, or the whole name when there is none
    pub fn local_part(&self) -> &str {
        self.0.split('@').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An (identity, password) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Credential {
    pub identity: Identity,
    pub password: String,
}

impl Credential {
    pub fn new(identity: Identity, password: impl Into<String>) -> Self {
        Self {
            identity,
            password: password.into(),
        }
    }

    /// Parse a `username:password` line, splitting at the first colon
    pub fn parse_pair(line: &str, domain: &str) -> Option<Self> {
        let (username, password) = line.split_once(':')?;
        if username.trim().is_empty() {
            return None;
        }
        Some(Self::new(Identity::qualified(username, domain), password))
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.identity, self.password)
    }
}

/// What a probe module observed, before classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawOutcome {
    /// Authentication succeeded or the account was confirmed; optional note
    Success(Option<String>),
    AuthFailure,
    UserNotFound,
    AccountLocked,
    Throttled,
    TransportError(String),
    /// Response shape the module does not understand
    Unrecognized(String),
}

impl RawOutcome {
    pub fn is_transport_error(&self) -> bool {
        matches!(self, RawOutcome::TransportError(_))
    }

    /// Detail note carried to the results sink
    pub fn detail(&self) -> Option<&str> {
        match self {
            RawOutcome::Success(note) => note.as_deref(),
            RawOutcome::TransportError(reason) | RawOutcome::Unrecognized(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Semantic verdict attached to an identity or credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    Exists,
    NotExists,
    ValidCredential,
    InvalidCredential,
    LockedOut,
    Throttled,
    Indeterminate,
}

impl Verdict {
    /// Verdicts after which the subject is settled for the run
    pub fn is_final(&self) -> bool {
        !matches!(self, Verdict::Throttled)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Exists => "VALID",
            Verdict::NotExists => "INVALID",
            Verdict::ValidCredential => "VALID",
            Verdict::InvalidCredential => "INVALID",
            Verdict::LockedOut => "LOCKED",
            Verdict::Throttled => "THROTTLED",
            Verdict::Indeterminate => "UNKNOWN",
        }
    }
}

/// Capability family of a probe module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleFamily {
    Validate,
    Enumerate,
    Spray,
}

impl fmt::Display for ModuleFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleFamily::Validate => f.write_str("validate"),
            ModuleFamily::Enumerate => f.write_str("enum"),
            ModuleFamily::Spray => f.write_str("spray"),
        }
    }
}

/// Tenant classification returned by a validation module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TenantKind {
    Managed,
    Federated { auth_url: Option<Url> },
    Unknown,
}

/// Immutable run-wide lockout policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutPolicy {
    pub max_attempts_per_window: u32,
    #[serde(with = "duration_secs")]
    pub window: Duration,
}

impl LockoutPolicy {
    pub fn new(max_attempts_per_window: u32, window: Duration) -> Self {
        Self {
            max_attempts_per_window,
            window,
        }
    }

    /// Build from a lockout reset time expressed in minutes
    pub fn from_minutes(max_attempts_per_window: u32, minutes: f64) -> Self {
        Self::new(
            max_attempts_per_window,
            Duration::from_secs_f64((minutes * 60.0).max(0.0)),
        )
    }
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self::from_minutes(1, 15.0)
    }
}

/// How outbound probes reach the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProxyConfig {
    Direct,
    /// Single fixed HTTP/S proxy
    Fixed(Url),
    /// API-gateway base URLs that stand in for the provider host
    Rotating(Vec<Url>),
}

impl Default for ProxyConfig {
    fn default() -> Self {
        ProxyConfig::Direct
    }
}

pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_qualification() {
        assert_eq!(Identity::qualified("alice", "corp.com").as_str(), "alice@corp.com");
        assert_eq!(Identity::qualified(" bob@corp.com ", "x.com").as_str(), "bob@corp.com");
        assert_eq!(Identity::qualified("carol", "").as_str(), "carol");
        assert_eq!(Identity::new("dave@corp.com").local_part(), "dave");
    }

    #[test]
    fn test_credential_pair_parsing() {
        let cred = Credential::parse_pair("alice:Pass:word", "corp.com").unwrap();
        assert_eq!(cred.identity.as_str(), "alice@corp.com");
        assert_eq!(cred.password, "Pass:word");
        assert_eq!(cred.to_string(), "alice@corp.com:Pass:word");

        assert!(Credential::parse_pair("no-colon", "corp.com").is_none());
        assert!(Credential::parse_pair(":orphan", "corp.com").is_none());
    }

    #[test]
    fn test_lockout_policy_minutes() {
        let policy = LockoutPolicy::from_minutes(2, 1.5);
        assert_eq!(policy.window, Duration::from_secs(90));
        assert_eq!(LockoutPolicy::default().window, Duration::from_secs(900));
    }

    #[test]
    fn test_only_throttled_is_not_final() {
        assert!(!Verdict::Throttled.is_final());
        assert!(Verdict::Indeterminate.is_final());
        assert!(Verdict::LockedOut.is_final());
    }
}
