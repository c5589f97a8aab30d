//! Ingestion error taxonomy

use darkroom_common::DarkroomError;
use thiserror::Error;
use uuid::Uuid;

use crate::db::{GalleryId, RepositoryError};
use crate::storage::StorageError;

/// Result type alias for pipeline operations
pub type IngestResult<T> = std::result::Result<T, IngestError>;

/// Errors raised while splitting, executing or tracking ingestion work
#[derive(Error, Debug)]
pub enum IngestError {
    /// The parent gallery is not visible yet, usually because the transaction
    /// that created it has not committed. The only retryable condition.
    #[error("Gallery {0} is not visible yet")]
    NotReady(GalleryId),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Common(#[from] DarkroomError),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Unknown ingestion group: {0}")]
    UnknownGroup(Uuid),

    #[error("Task queue is closed")]
    QueueClosed,

    /// Tasks that finished but whose final state could not be written;
    /// they stay unfinished in the store and run again on resume
    #[error("{0} finished task(s) have no recorded state; run resume")]
    UnrecordedTasks(usize),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IngestError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, IngestError::NotReady(_))
    }
}

impl From<zip::result::ZipError> for IngestError {
    fn from(err: zip::result::ZipError) -> Self {
        IngestError::Archive(err.to_string())
    }
}

impl From<tokio::task::JoinError> for IngestError {
    fn from(err: tokio::task::JoinError) -> Self {
        IngestError::Internal(format!("Blocking task failed: {}", err))
    }
}
