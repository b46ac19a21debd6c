//! Error types for the comparison engine.

use std::io;

use buildplane_catalog::CatalogError;

#[derive(Debug, thiserror::Error)]
pub enum CompareError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("archive error: {0}")]
    Io(#[from] io::Error),

    #[error("comparison engine is shut down")]
    Closed,
}

pub type CompareResult<T> = Result<T, CompareError>;
