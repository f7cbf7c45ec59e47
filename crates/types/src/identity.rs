//! Identity records and their building blocks

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable, immutable account identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Did(pub String);

impl Did {
    /// Create a new DID from string
    pub fn new(did: impl Into<String>) -> Self {
        Self(did.into())
    }

    /// Get the DID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Primary key form, comparable directly across sources
    pub fn is_plc(&self) -> bool {
        self.0.starts_with("did:plc:")
    }

    /// Indirect key form; must be resolved back to its canonical handle
    /// before two sources can be compared
    pub fn is_web(&self) -> bool {
        self.0.starts_with("did:web:")
    }

    /// Domain part of a `did:web:` identifier
    pub fn web_domain(&self) -> Option<&str> {
        self.0.strip_prefix("did:web:")
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Human-readable handle bound to a DID
///
/// Stored in normalized form: lowercase, no `@` or `at://` prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Handle(pub String);

impl Handle {
    /// Create a handle, normalizing the common prefixes the feed carries
    pub fn new(handle: impl Into<String>) -> Self {
        let raw: String = handle.into();
        let trimmed = raw.trim();
        let stripped = trimmed
            .strip_prefix("at://")
            .or_else(|| trimmed.strip_prefix('@'))
            .unwrap_or(trimmed);
        Self(stripped.to_ascii_lowercase())
    }

    /// Get the handle as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validate handle format
    pub fn is_valid(&self) -> bool {
        let h = &self.0;
        !h.is_empty()
            && h.len() < 254
            && h.contains('.')
            && h.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
    }

    /// Whether the handle sits under the given platform suffix
    pub fn under_suffix(&self, suffix: &str) -> bool {
        self.0.ends_with(suffix)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Verification state of a handle binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyState {
    Unverified,
    Valid,
    Invalid,
}

impl Default for VerifyState {
    fn default() -> Self {
        VerifyState::Unverified
    }
}

/// Identity record as persisted in the store
///
/// Created on first sighting in the directory feed. The handle and endpoint
/// are mutated on (re)resolution; the record is never deleted except by an
/// explicit purge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub did: Did,
    pub handle: Option<Handle>,
    pub pds_endpoint: Option<String>,
    pub created_at: DateTime<Utc>,
    pub verified: VerifyState,
}

/// Canonical shape produced by the feed extractor, before persistence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedIdentity {
    pub did: Did,
    pub handle: Option<Handle>,
    pub pds_endpoint: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Append-only block relation between two accounts
///
/// Produced and consumed by surrounding glue; the store only persists them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEdge {
    pub source: Did,
    pub target: Did,
    pub observed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn did_forms() {
        assert!(Did::new("did:plc:abc123").is_plc());
        assert!(!Did::new("did:plc:abc123").is_web());
        assert!(Did::new("did:web:example.com").is_web());
        assert_eq!(
            Did::new("did:web:example.com").web_domain(),
            Some("example.com")
        );
        assert_eq!(Did::new("did:plc:abc123").web_domain(), None);
    }

    #[test]
    fn handle_normalization() {
        assert_eq!(Handle::new("at://Alice.example.com").as_str(), "alice.example.com");
        assert_eq!(Handle::new("@bob.example.com").as_str(), "bob.example.com");
        assert_eq!(Handle::new("  carol.example.com ").as_str(), "carol.example.com");
    }

    #[test]
    fn handle_validation() {
        assert!(Handle::new("alice.example.com").is_valid());
        assert!(!Handle::new("no-dots").is_valid());
        assert!(!Handle::new("").is_valid());
        assert!(!Handle::new("bad handle.example.com").is_valid());
    }

    #[test]
    fn handle_suffix() {
        assert!(Handle::new("alice.bsky.social").under_suffix(".bsky.social"));
        assert!(!Handle::new("alice.example.com").under_suffix(".bsky.social"));
    }
}
