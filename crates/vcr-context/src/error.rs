//! Error types for vcr-context

use thiserror::Error;

/// Errors that can occur while reading the context store
#[derive(Error, Debug)]
pub enum StorageError {
    /// The store could not be opened
    #[error("Context store connection failed: {0}")]
    Connection(String),

    /// A lookup query failed (missing table, corrupt data, ...)
    #[error("Context store query failed: {0}")]
    Query(String),

    /// A row could not be decoded
    #[error("Context store returned malformed data: {0}")]
    Malformed(String),
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        StorageError::Query(err.to_string())
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::InvalidColumnType(..) => StorageError::Malformed(err.to_string()),
            other => StorageError::Query(other.to_string()),
        }
    }
}
