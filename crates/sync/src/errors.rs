//! Error types for sync jobs

use atgraph_types::SyncStage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("storage error: {0}")]
    Storage(#[from] atgraph_storage::StorageError),

    #[error("directory error: {0}")]
    Directory(#[from] atgraph_resolver::ResolverError),

    #[error("another {stage} run holds the job lease")]
    LeaseHeld { stage: SyncStage },
}

pub type Result<T> = std::result::Result<T, SyncError>;
