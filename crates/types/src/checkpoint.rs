//! Resumable job checkpoints

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline stage a checkpoint belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStage {
    /// Incremental walk of the directory export feed
    DirectorySync,
    /// Bulk re-verification of handle bindings
    HandleSync,
}

impl SyncStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStage::DirectorySync => "directory_sync",
            SyncStage::HandleSync => "handle_sync",
        }
    }
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable marker of the last safely processed unit of work
///
/// One row per stage. The cursor is a feed timestamp for directory sync and
/// the last committed DID for handle sync. Written in the same transaction
/// as the unit's own writes, so it never reflects uncommitted progress. The
/// version increments on every write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub stage: SyncStage,
    pub cursor: String,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// First checkpoint of a run
    pub fn new(stage: SyncStage, cursor: impl Into<String>) -> Self {
        Self {
            stage,
            cursor: cursor.into(),
            version: 1,
            updated_at: Utc::now(),
        }
    }

    /// Successor checkpoint with an advanced cursor
    pub fn advanced(&self, cursor: impl Into<String>) -> Self {
        Self {
            stage: self.stage,
            cursor: cursor.into(),
            version: self.version + 1,
            updated_at: Utc::now(),
        }
    }
}

/// Exclusive run guard for a stage
///
/// Prevents two resolver jobs of the same stage from interleaving; an
/// expired lease may be reclaimed by any owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub owner: String,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn new(owner: impl Into<String>, ttl: Duration) -> Self {
        Self {
            owner: owner.into(),
            expires_at: Utc::now() + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }
}
