use common::storage::{ContentHash, StorageError};
use sea_orm::DbErr;
use uuid::Uuid;

/// Failures of the deduplication engine.
#[derive(Debug, thiserror::Error)]
pub enum FileError {
    /// Bad input; nothing was written.
    #[error("{0}")]
    Validation(String),

    #[error("file {0} not found")]
    NotFound(Uuid),

    /// Blob store or upload stream failure.
    #[error("storage failure: {0}")]
    Io(StorageError),

    /// Another writer committed a canonical record for the same content first.
    #[error("a canonical record for {hash} was committed concurrently")]
    Consistency { hash: ContentHash },

    /// A persisted row violates the record invariants.
    #[error("file record {id} is corrupt: {reason}")]
    CorruptRecord { id: Uuid, reason: String },

    #[error(transparent)]
    Database(#[from] DbErr),
}

impl From<StorageError> for FileError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::SizeLimitExceeded { limit, .. } => {
                FileError::Validation(format!("File exceeds maximum size of {limit} bytes"))
            }
            other => FileError::Io(other),
        }
    }
}
