//! buildplane-pipeline: release pipeline orchestration.
//!
//! One [`Orchestrator::run`] call drives a single build from BEFORE_TRIGGER
//! to a terminal status, persisting partial output and a stage log as it
//! goes. Work outside the pipeline's own concerns (schema detection,
//! transformation, classification, external validation) is delegated to
//! the collaborator traits in [`collaborators`].

pub mod cancel;
pub mod collaborators;
pub mod derive;
pub mod error;
pub mod orchestrator;
pub mod package;
pub mod readme;

pub use cancel::CancellationToken;
pub use collaborators::{
    ArchivePackager, CheckContext, ClassificationResult, Classifier, Collaborators,
    ConditionChecker, ContentTransformer, FilenameSchemaRecognizer, JsonManifestParser,
    ManifestListing, ManifestParser, NoopConditionChecker, PassthroughTransformer, ReleaseType,
    ReleaseValidator, SchemaRecognizer, TableSchema, ValidationState, ValidationTicket,
};
pub use error::{PipelineError, PipelineResult};
pub use orchestrator::{BuildOutcome, Orchestrator, Stage};
pub use package::TarPackager;
