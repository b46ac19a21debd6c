//! Collaborator seams.
//!
//! Everything the orchestrator delegates (schema detection, content
//! transformation, classification, external validation, manifest parsing,
//! condition checks, archive packaging) sits behind one of these traits.
//! Calls are synchronous; the orchestrator decides where they run.

use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use buildplane_catalog::Build;
use buildplane_core::{BuildConfiguration, ConditionCheckReport, QaConfiguration};

use crate::error::{PipelineError, PipelineResult};
use crate::package::TarPackager;

// ── Schemas ────────────────────────────────────────────────────────

/// Which flavour of a table a file carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReleaseType {
    Delta,
    Snapshot,
    Full,
}

impl ReleaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseType::Delta => "Delta",
            ReleaseType::Snapshot => "Snapshot",
            ReleaseType::Full => "Full",
        }
    }
}

impl fmt::Display for ReleaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a recognizer knows about one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub file_name: String,
    /// Identity of the table regardless of release type or date.
    pub table_name: String,
    pub release_type: ReleaseType,
}

pub trait SchemaRecognizer: Send + Sync {
    fn recognize(&self, file_name: &str) -> PipelineResult<TableSchema>;
}

/// Recognizes `prefix_Table_Delta_...` style names.
///
/// The first underscore-separated segment that ends in `Delta`, `Snapshot`
/// or `Full`, once any `-en` style language suffix is dropped, names the
/// release type; everything before it names the table.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilenameSchemaRecognizer;

impl SchemaRecognizer for FilenameSchemaRecognizer {
    fn recognize(&self, file_name: &str) -> PipelineResult<TableSchema> {
        let stem = file_name
            .rsplit_once('.')
            .map_or(file_name, |(stem, _)| stem);
        let segments: Vec<&str> = stem.split('_').collect();

        for (idx, segment) in segments.iter().enumerate() {
            let head = segment.split_once('-').map_or(*segment, |(head, _)| head);
            for release_type in [ReleaseType::Delta, ReleaseType::Snapshot, ReleaseType::Full] {
                let Some(table_part) = head.strip_suffix(release_type.as_str()) else {
                    continue;
                };
                let mut table: Vec<&str> = segments[..idx].to_vec();
                if !table_part.is_empty() {
                    table.push(table_part);
                }
                if table.is_empty() {
                    break;
                }
                return Ok(TableSchema {
                    file_name: file_name.to_string(),
                    table_name: table.join("_"),
                    release_type,
                });
            }
        }
        Err(PipelineError::collaborator(
            "schema recognizer",
            format!("no release type in file name {file_name:?}"),
        ))
    }
}

// ── Transformation ─────────────────────────────────────────────────

pub trait ContentTransformer: Send + Sync {
    fn transform(&self, schema: &TableSchema, input: &[u8]) -> PipelineResult<Vec<u8>>;
}

/// Returns its input unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughTransformer;

impl ContentTransformer for PassthroughTransformer {
    fn transform(&self, _schema: &TableSchema, input: &[u8]) -> PipelineResult<Vec<u8>> {
        Ok(input.to_vec())
    }
}

// ── Classification ─────────────────────────────────────────────────

/// File produced by the classifier, folded back into the build as an input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationResult {
    pub file_name: String,
    pub content: Vec<u8>,
}

pub trait Classifier: Send + Sync {
    fn classify(
        &self,
        delta_archive: &[u8],
        previous_release: Option<&str>,
        dependency_release: Option<&str>,
    ) -> PipelineResult<ClassificationResult>;
}

// ── External validation ────────────────────────────────────────────

/// Handle returned by a validation submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationTicket {
    pub id: String,
    /// Where operators can follow the run.
    pub url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationState {
    Pending,
    Running,
    Passed(serde_json::Value),
    PassedWithWarnings(serde_json::Value),
    Failed(serde_json::Value),
}

pub trait ReleaseValidator: Send + Sync {
    fn submit(
        &self,
        archive_key: &str,
        manifest: &ManifestListing,
        qa: &QaConfiguration,
    ) -> PipelineResult<ValidationTicket>;

    fn poll(&self, ticket: &ValidationTicket) -> PipelineResult<ValidationState>;
}

// ── Manifest ───────────────────────────────────────────────────────

/// Files a release is expected to contain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestListing {
    pub archive_name: Option<String>,
    pub files: Vec<String>,
}

impl ManifestListing {
    /// An empty manifest admits every file.
    pub fn admits(&self, file_name: &str) -> bool {
        self.files.is_empty() || self.files.iter().any(|f| f == file_name)
    }
}

pub trait ManifestParser: Send + Sync {
    fn parse(&self, reader: &mut dyn Read) -> PipelineResult<ManifestListing>;
}

/// Reads a [`ManifestListing`] serialized as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonManifestParser;

impl ManifestParser for JsonManifestParser {
    fn parse(&self, reader: &mut dyn Read) -> PipelineResult<ManifestListing> {
        serde_json::from_reader(reader).map_err(|e| PipelineError::collaborator("manifest parser", e))
    }
}

// ── Condition checks ───────────────────────────────────────────────

/// What a condition checker gets to look at.
pub struct CheckContext<'a> {
    pub build: &'a Build,
    pub configuration: &'a BuildConfiguration,
    pub manifest: &'a ManifestListing,
    /// Input names before the run, output names after it.
    pub files: &'a [String],
}

pub trait ConditionChecker: Send + Sync {
    fn pre(&self, ctx: &CheckContext<'_>) -> PipelineResult<Vec<ConditionCheckReport>>;
    fn post(&self, ctx: &CheckContext<'_>) -> PipelineResult<Vec<ConditionCheckReport>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopConditionChecker;

impl ConditionChecker for NoopConditionChecker {
    fn pre(&self, _ctx: &CheckContext<'_>) -> PipelineResult<Vec<ConditionCheckReport>> {
        Ok(Vec::new())
    }

    fn post(&self, _ctx: &CheckContext<'_>) -> PipelineResult<Vec<ConditionCheckReport>> {
        Ok(Vec::new())
    }
}

// ── Packaging ──────────────────────────────────────────────────────

pub trait ArchivePackager: Send + Sync {
    /// Write `files` (name, content) as one archive into `sink`.
    fn package(&self, files: &[(String, Vec<u8>)], sink: &mut dyn Write) -> PipelineResult<()>;
}

// ── Bundle ─────────────────────────────────────────────────────────

/// The set of collaborators one orchestrator works with.
#[derive(Clone)]
pub struct Collaborators {
    pub recognizer: Arc<dyn SchemaRecognizer>,
    pub transformer: Arc<dyn ContentTransformer>,
    pub manifest_parser: Arc<dyn ManifestParser>,
    pub conditions: Arc<dyn ConditionChecker>,
    pub packager: Arc<dyn ArchivePackager>,
    pub classifier: Option<Arc<dyn Classifier>>,
    pub validator: Option<Arc<dyn ReleaseValidator>>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            recognizer: Arc::new(FilenameSchemaRecognizer),
            transformer: Arc::new(PassthroughTransformer),
            manifest_parser: Arc::new(JsonManifestParser),
            conditions: Arc::new(NoopConditionChecker),
            packager: Arc::new(TarPackager),
            classifier: None,
            validator: None,
        }
    }
}

impl Collaborators {
    pub fn with_recognizer(mut self, recognizer: Arc<dyn SchemaRecognizer>) -> Self {
        self.recognizer = recognizer;
        self
    }

    pub fn with_transformer(mut self, transformer: Arc<dyn ContentTransformer>) -> Self {
        self.transformer = transformer;
        self
    }

    pub fn with_conditions(mut self, conditions: Arc<dyn ConditionChecker>) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn ReleaseValidator>) -> Self {
        self.validator = Some(validator);
        self
    }
}
