//! Error types for the release pipeline.

use std::io;

use buildplane_catalog::CatalogError;
use buildplane_store::StoreError;

/// Errors raised while running a build.
///
/// Stage failures are caught by the orchestrator and recorded on the build;
/// only faults that prevent recording them escape [`crate::Orchestrator::run`].
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{stage}: {message}")]
    BusinessService { stage: String, message: String },

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{collaborator} failed: {reason}")]
    Collaborator {
        collaborator: &'static str,
        reason: String,
    },

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl PipelineError {
    pub fn business(stage: impl Into<String>, message: impl Into<String>) -> Self {
        PipelineError::BusinessService {
            stage: stage.into(),
            message: message.into(),
        }
    }

    pub fn collaborator(collaborator: &'static str, reason: impl ToString) -> Self {
        PipelineError::Collaborator {
            collaborator,
            reason: reason.to_string(),
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
