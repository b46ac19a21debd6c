//! Error types for the Buildplane object store.

use thiserror::Error;

/// Result type alias for object store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Storage faults. A missing object is never one of these.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open object store: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("upload of {key} failed: {reason}")]
    Upload { key: String, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
