//! Backend error plumbing
//!
//! redb and serde_json errors are collected here so adapter code can use `?`
//! inside blocking closures, then mapped onto [`StoreError`] at the trait
//! boundary.

use dualstore_core::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Database open failed: {0}")]
    Open(#[from] redb::DatabaseError),

    #[error("Transaction failed: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table access failed: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage failure: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit failed: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Document encoding failed: {0}")]
    Codec(#[from] serde_json::Error),
}

pub type BackendResult<T> = Result<T, BackendError>;

impl From<BackendError> for StoreError {
    fn from(error: BackendError) -> Self {
        match error {
            BackendError::Store(inner) => inner,
            BackendError::Open(redb::DatabaseError::DatabaseAlreadyOpen) => {
                StoreError::Unavailable("database is locked by another process".to_string())
            }
            other => StoreError::other(other),
        }
    }
}

/// Map a failed `spawn_blocking` join onto a store error
pub(crate) fn join_error(error: tokio::task::JoinError) -> StoreError {
    StoreError::message(format!("Task join error: {}", error))
}
