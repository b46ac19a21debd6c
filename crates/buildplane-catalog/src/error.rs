//! Catalog error types.

use thiserror::Error;

/// Errors surfaced by catalog operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Build, product or file absent. Never retried.
    #[error("not found: {0}")]
    NotFound(String),

    /// Illegal transition or missing parameter. Storage is left unchanged.
    #[error("bad configuration: {0}")]
    BadConfiguration(String),

    #[error("object store error: {0}")]
    Store(#[from] buildplane_store::StoreError),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error in {key}: {reason}")]
    Deserialize { key: String, reason: String },
}

pub type CatalogResult<T> = Result<T, CatalogError>;
