//! Incremental synchronization against the distributed directory
//!
//! Two jobs keep the local identity store consistent: the
//! [`DirectoryWalker`] ingests the directory export feed page by page
//! behind a durable cursor, and the [`BatchResolver`] re-verifies handle
//! bindings in checkpointed batches. Both are crash-safe and resumable;
//! an interrupted run redoes at most one committed unit of work.

pub mod batch;
pub mod errors;
pub mod extract;
pub mod walker;

pub use batch::{BatchConfig, BatchReport, BatchResolver};
pub use errors::{Result, SyncError};
pub use extract::normalize;
pub use walker::{DirectoryWalker, WalkReport};
