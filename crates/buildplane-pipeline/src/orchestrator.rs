//! Pipeline orchestrator: drives one build through its stages.
//!
//! ```text
//! configuration → input reports → pre-conditions → BUILDING → input fix
//!   → schema recognition → transformation → derivation → classification
//!   → readme → packaging → post-conditions
//!   → offline: RELEASE_COMPLETE(_WITH_WARNINGS)
//!   → online:  BUILT → RVF_QUEUED → RVF_RUNNING → RELEASE_COMPLETE(_WITH_WARNINGS)
//! ```
//!
//! A cancellation checkpoint precedes every stage and every validation poll.
//! Stage errors never escape: they are written into `report.json` and the
//! build moves to FAILED. Rule findings that reject a build (fatal
//! pre-condition, failing post-condition, failed validation) move it to the
//! matching status without raising.

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Write};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::json;
use tracing::{debug, info, warn};

use buildplane_catalog::{
    ArtifactKind, Build, BuildCatalog, BuildQuery, CatalogError, InputReportKind, paths,
};
use buildplane_core::config::PipelineConfig;
use buildplane_core::{
    BuildConfiguration, BuildKey, BuildStatus, BuildTag, CheckResult,
    ConditionPhase, QaConfiguration,
};
use buildplane_store::open_sink;

use crate::cancel::CancellationToken;
use crate::collaborators::{
    CheckContext, Collaborators, ManifestListing, ReleaseType, TableSchema, ValidationState,
};
use crate::derive::{derive_full, derive_snapshot, derived_name};
use crate::error::{PipelineError, PipelineResult};
use crate::package::{archive_name, unpack_entries};
use crate::readme;

const PIPELINE_LOG: &str = "pipeline.log";
const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Configuration,
    InputReports,
    PreConditions,
    Trigger,
    InputFix,
    SchemaRecognition,
    Transformation,
    Derivation,
    Classification,
    Readme,
    Packaging,
    PostConditions,
    Validation,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Configuration => "configuration",
            Stage::InputReports => "input-reports",
            Stage::PreConditions => "pre-conditions",
            Stage::Trigger => "trigger",
            Stage::InputFix => "input-fix",
            Stage::SchemaRecognition => "schema-recognition",
            Stage::Transformation => "transformation",
            Stage::Derivation => "derivation",
            Stage::Classification => "classification",
            Stage::Readme => "readme",
            Stage::Packaging => "packaging",
            Stage::PostConditions => "post-conditions",
            Stage::Validation => "validation",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a pipeline run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    /// RELEASE_COMPLETE, or RELEASE_COMPLETE_WITH_WARNINGS when `warnings`.
    Released { warnings: bool },
    /// A rule or the external validator rejected the build.
    Rejected(BuildStatus),
    /// A stage raised; the message is also in `report.json`.
    Failed(String),
    Cancelled,
}

/// Why `execute` stopped early.
enum Halt {
    Cancelled,
    Rejected(BuildStatus),
    Failed(Stage, PipelineError),
}

trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T, Halt>;
}

impl<T, E: Into<PipelineError>> AtStage<T> for Result<T, E> {
    fn at(self, stage: Stage) -> Result<T, Halt> {
        self.map_err(|e| Halt::Failed(stage, e.into()))
    }
}

/// Everything loaded before the build is triggered.
struct Setup {
    configuration: BuildConfiguration,
    qa: QaConfiguration,
    manifest: ManifestListing,
    effective_time: NaiveDate,
}

/// Mutable state of one run.
struct Run {
    build: Build,
    log: Vec<String>,
    warnings: bool,
}

impl Run {
    fn note(&mut self, stage: Stage, message: impl AsRef<str>) {
        let message = message.as_ref();
        debug!(build = %self.build.key, %stage, "{message}");
        self.log.push(format!(
            "{} [{stage}] {message}",
            Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ")
        ));
    }
}

type NamedFile = (String, Vec<u8>);

pub struct Orchestrator {
    catalog: BuildCatalog,
    collaborators: Collaborators,
    poll_interval: Duration,
    validation_timeout: Duration,
}

impl Orchestrator {
    /// Offline mode follows the catalog's status machine.
    pub fn new(catalog: BuildCatalog, collaborators: Collaborators, config: &PipelineConfig) -> Self {
        Self {
            catalog,
            collaborators,
            poll_interval: config.validation_poll_interval(),
            validation_timeout: config.validation_timeout(),
        }
    }

    pub fn catalog(&self) -> &BuildCatalog {
        &self.catalog
    }

    fn offline(&self) -> bool {
        self.catalog.status_machine().offline_mode()
    }

    /// Run the pipeline for a build in BEFORE_TRIGGER.
    ///
    /// Returns `Err` only when the build cannot be started or its failure
    /// cannot be recorded.
    pub async fn run(
        &self,
        key: &BuildKey,
        token: &CancellationToken,
    ) -> PipelineResult<BuildOutcome> {
        let build = self.catalog.require(key)?;
        if !matches!(
            build.status,
            BuildStatus::BeforeTrigger | BuildStatus::CancelRequested
        ) {
            return Err(CatalogError::BadConfiguration(format!(
                "build {key} is {}; only BEFORE_TRIGGER builds can run",
                build.status
            ))
            .into());
        }

        info!(build = %key, offline = self.offline(), "pipeline started");
        let mut run = Run {
            build,
            log: Vec::new(),
            warnings: false,
        };
        let outcome = match self.execute(&mut run, token).await {
            Ok(outcome) => outcome,
            Err(Halt::Cancelled) => self.finish_cancelled(&mut run)?,
            Err(Halt::Rejected(status)) => BuildOutcome::Rejected(status),
            Err(Halt::Failed(stage, error)) => self.finish_failed(&mut run, stage, error)?,
        };
        info!(build = %key, ?outcome, "pipeline finished");
        Ok(outcome)
    }

    async fn execute(
        &self,
        run: &mut Run,
        token: &CancellationToken,
    ) -> Result<BuildOutcome, Halt> {
        let key = run.build.key.clone();

        self.checkpoint(run, token, Stage::Configuration)?;
        let setup = self.load_setup(&key).at(Stage::Configuration)?;
        run.note(
            Stage::Configuration,
            format!("effective time {}", setup.effective_time),
        );
        self.end_stage(run, Stage::Configuration)?;

        self.checkpoint(run, token, Stage::InputReports)?;
        self.check_input_reports(run)?;
        self.end_stage(run, Stage::InputReports)?;

        self.checkpoint(run, token, Stage::PreConditions)?;
        self.pre_conditions(run, &setup)?;
        self.end_stage(run, Stage::PreConditions)?;

        self.checkpoint(run, token, Stage::Trigger)?;
        self.catalog
            .update_status(&mut run.build, BuildStatus::Building)
            .at(Stage::Trigger)?;
        run.note(Stage::Trigger, "build triggered");
        self.end_stage(run, Stage::Trigger)?;

        self.checkpoint(run, token, Stage::InputFix)?;
        let inputs = self.prepare_inputs(run, &setup).at(Stage::InputFix)?;
        self.end_stage(run, Stage::InputFix)?;

        let mut outputs = if setup.configuration.just_package {
            run.note(Stage::Transformation, "just-package build, inputs copied as-is");
            inputs
        } else {
            self.transform_and_derive(run, token, &setup, inputs)?
        };

        self.checkpoint(run, token, Stage::Readme)?;
        let readme = self.write_readme(run, &setup, &outputs).await.at(Stage::Readme)?;
        self.end_stage(run, Stage::Readme)?;

        self.checkpoint(run, token, Stage::Packaging)?;
        for (name, data) in &outputs {
            self.catalog
                .put_file(&key, ArtifactKind::OutputFiles, name, data)
                .at(Stage::Packaging)?;
        }
        outputs.push(readme);
        let archive = archive_name(&key.product, setup.effective_time);
        let archive_key = self.package(&key, &archive, &outputs).await.at(Stage::Packaging)?;
        run.note(
            Stage::Packaging,
            format!("{archive} packaged with {} files", outputs.len()),
        );
        self.end_stage(run, Stage::Packaging)?;

        self.checkpoint(run, token, Stage::PostConditions)?;
        let mut names: Vec<String> = outputs.iter().map(|(name, _)| name.clone()).collect();
        names.push(archive.clone());
        self.post_conditions(run, &setup, &names)?;
        self.end_stage(run, Stage::PostConditions)?;

        if self.offline() {
            return self.release(run, false, &archive);
        }

        self.catalog
            .update_status(&mut run.build, BuildStatus::Built)
            .at(Stage::Validation)?;
        self.validate(run, token, &setup, &archive_key, &archive).await
    }

    // ── Checkpoints and bookkeeping ────────────────────────────────

    /// Stop here if cancellation was requested in-process or in storage.
    fn checkpoint(
        &self,
        run: &mut Run,
        token: &CancellationToken,
        next: Stage,
    ) -> Result<(), Halt> {
        if token.is_cancelled() {
            run.note(next, "cancellation requested by caller");
            return Err(Halt::Cancelled);
        }
        let persisted = self
            .catalog
            .find(&run.build.key, &BuildQuery::default())
            .at(next)?
            .ok_or_else(|| {
                Halt::Failed(
                    next,
                    CatalogError::NotFound(format!("build {}", run.build.key)).into(),
                )
            })?;
        run.build.status = persisted.status;
        if persisted.status == BuildStatus::CancelRequested {
            run.note(next, "cancellation requested in storage");
            return Err(Halt::Cancelled);
        }
        Ok(())
    }

    fn persist_log(&self, run: &Run) -> PipelineResult<()> {
        let mut content = run.log.join("\n");
        content.push('\n');
        self.catalog.put_file(
            &run.build.key,
            ArtifactKind::Logs,
            PIPELINE_LOG,
            content.as_bytes(),
        )?;
        Ok(())
    }

    fn end_stage(&self, run: &mut Run, stage: Stage) -> Result<(), Halt> {
        run.note(stage, "stage complete");
        self.persist_log(run).at(stage)
    }

    fn write_progress(&self, key: &BuildKey, status: &str, message: &str) -> PipelineResult<()> {
        let mut report = self.catalog.load_report(key)?.unwrap_or_default();
        report.set_progress(status, message);
        self.catalog.save_report(key, &report)?;
        Ok(())
    }

    /// Record a rejection and move the build to `status`.
    fn reject(&self, run: &mut Run, stage: Stage, status: BuildStatus, message: String) -> Halt {
        warn!(build = %run.build.key, %stage, %status, %message, "build rejected");
        run.note(stage, &message);
        match self.record_rejection(run, status, &message) {
            Ok(()) => Halt::Rejected(status),
            Err(e) => Halt::Failed(stage, e),
        }
    }

    fn record_rejection(&self, run: &mut Run, status: BuildStatus, message: &str) -> PipelineResult<()> {
        self.write_progress(&run.build.key, status.as_str(), message)?;
        self.persist_log(run)?;
        self.catalog.update_status(&mut run.build, status)?;
        Ok(())
    }

    fn finish_cancelled(&self, run: &mut Run) -> PipelineResult<BuildOutcome> {
        if run.build.status != BuildStatus::CancelRequested {
            self.catalog
                .update_status(&mut run.build, BuildStatus::CancelRequested)?;
        }
        self.catalog
            .update_status(&mut run.build, BuildStatus::Cancelled)?;
        self.write_progress(&run.build.key, "CANCELLED", "build cancelled")?;
        run.log.push("build cancelled".to_string());
        self.persist_log(run)?;
        Ok(BuildOutcome::Cancelled)
    }

    fn finish_failed(
        &self,
        run: &mut Run,
        stage: Stage,
        error: PipelineError,
    ) -> PipelineResult<BuildOutcome> {
        let message = match &error {
            PipelineError::BusinessService { .. } => error.to_string(),
            other => format!("{stage}: {other}"),
        };
        warn!(build = %run.build.key, %stage, error = %message, "build failed");
        run.note(stage, &message);

        let mut report = self.catalog.load_report(&run.build.key)?.unwrap_or_default();
        report.set_progress(BuildStatus::Failed.as_str(), message.clone());
        report.add("failed_stage", stage.as_str());
        self.catalog.save_report(&run.build.key, &report)?;
        self.persist_log(run)?;
        self.catalog.update_status(&mut run.build, BuildStatus::Failed)?;
        Ok(BuildOutcome::Failed(message))
    }

    // ── Stages ─────────────────────────────────────────────────────

    fn load_setup(&self, key: &BuildKey) -> PipelineResult<Setup> {
        let configuration = self.catalog.load_configuration(key)?.ok_or_else(|| {
            PipelineError::business(Stage::Configuration.as_str(), "build has no configuration")
        })?;
        let effective_time = configuration.effective_time.ok_or_else(|| {
            PipelineError::business(Stage::Configuration.as_str(), "effective time is not set")
        })?;
        let qa = self.catalog.load_qa_configuration(key)?.unwrap_or_default();

        let manifest = match self.catalog.list_files(key, ArtifactKind::Manifest)?.first() {
            Some(name) => {
                let data = self
                    .catalog
                    .get_file(key, ArtifactKind::Manifest, name)?
                    .unwrap_or_default();
                self.collaborators
                    .manifest_parser
                    .parse(&mut data.as_slice())?
            }
            None => ManifestListing::default(),
        };

        Ok(Setup {
            configuration,
            qa,
            manifest,
            effective_time,
        })
    }

    fn check_input_reports(&self, run: &mut Run) -> Result<(), Halt> {
        let stage = Stage::InputReports;
        for kind in [InputReportKind::Gather, InputReportKind::Prepare] {
            let Some(report) = self
                .catalog
                .load_input_report(&run.build.key, kind)
                .at(stage)?
            else {
                continue;
            };
            if report.is_completed() {
                run.note(stage, format!("{} is valid", kind.object_name()));
                continue;
            }
            let status = match kind {
                InputReportKind::Gather => BuildStatus::FailedInputGatherReportValidation,
                InputReportKind::Prepare => BuildStatus::FailedInputPrepareReportValidation,
            };
            let message = format!(
                "{} has status {}{}",
                kind.object_name(),
                report.status,
                report
                    .message
                    .as_deref()
                    .map(|m| format!(": {m}"))
                    .unwrap_or_default()
            );
            return Err(self.reject(run, stage, status, message));
        }
        Ok(())
    }

    fn pre_conditions(&self, run: &mut Run, setup: &Setup) -> Result<(), Halt> {
        let stage = Stage::PreConditions;
        let inputs = self
            .catalog
            .list_files(&run.build.key, ArtifactKind::InputFiles)
            .at(stage)?;
        let findings = self
            .collaborators
            .conditions
            .pre(&CheckContext {
                build: &run.build,
                configuration: &setup.configuration,
                manifest: &setup.manifest,
                files: &inputs,
            })
            .at(stage)?;
        self.catalog
            .save_condition_report(&run.build.key, ConditionPhase::Pre, &findings)
            .at(stage)?;

        for finding in findings.iter().filter(|f| f.result != CheckResult::Pass) {
            run.note(
                stage,
                format!("{} {:?}: {}", finding.rule_name, finding.result, finding.message),
            );
        }
        if let Some(fatal) = findings.iter().find(|f| f.result == CheckResult::Fatal) {
            let message = format!(
                "fatal pre-condition {}: {}",
                fatal.rule_name, fatal.message
            );
            return Err(self.reject(run, stage, BuildStatus::FailedPreConditions, message));
        }
        Ok(())
    }

    /// Load input files, normalizing them first when configured.
    fn prepare_inputs(&self, run: &mut Run, setup: &Setup) -> PipelineResult<Vec<NamedFile>> {
        let key = &run.build.key;
        let names = self.catalog.list_files(key, ArtifactKind::InputFiles)?;
        if names.is_empty() {
            return Err(PipelineError::business(
                Stage::InputFix.as_str(),
                "build has no input files",
            ));
        }

        let mut inputs = Vec::with_capacity(names.len());
        let mut fixed = 0usize;
        for name in names {
            let data = self
                .catalog
                .get_file(key, ArtifactKind::InputFiles, &name)?
                .unwrap_or_default();
            let data = if setup.configuration.input_files_fix_required {
                let normalized = fix_input(&data);
                if normalized != data {
                    self.catalog
                        .put_file(key, ArtifactKind::InputFiles, &name, &normalized)?;
                    fixed += 1;
                }
                normalized
            } else {
                data
            };
            inputs.push((name, data));
        }
        run.note(
            Stage::InputFix,
            format!("{} input files loaded, {fixed} fixed", inputs.len()),
        );
        Ok(inputs)
    }

    fn transform_and_derive(
        &self,
        run: &mut Run,
        token: &CancellationToken,
        setup: &Setup,
        inputs: Vec<NamedFile>,
    ) -> Result<Vec<NamedFile>, Halt> {
        let key = run.build.key.clone();

        self.checkpoint(run, token, Stage::SchemaRecognition)?;
        let mut recognized: Vec<(TableSchema, Vec<u8>)> = Vec::new();
        for (name, data) in inputs {
            if !setup.manifest.admits(&name) {
                run.note(
                    Stage::SchemaRecognition,
                    format!("{name} is not in the manifest, skipped"),
                );
                continue;
            }
            let schema = self
                .collaborators
                .recognizer
                .recognize(&name)
                .at(Stage::SchemaRecognition)?;
            recognized.push((schema, data));
        }
        self.end_stage(run, Stage::SchemaRecognition)?;

        self.checkpoint(run, token, Stage::Transformation)?;
        let mut transformed: Vec<(TableSchema, Vec<u8>)> = Vec::with_capacity(recognized.len());
        for (schema, data) in recognized {
            let output = self
                .collaborators
                .transformer
                .transform(&schema, &data)
                .at(Stage::Transformation)?;
            self.catalog
                .put_file(&key, ArtifactKind::TransformedFiles, &schema.file_name, &output)
                .at(Stage::Transformation)?;
            transformed.push((schema, output));
        }
        run.note(
            Stage::Transformation,
            format!("{} files transformed", transformed.len()),
        );
        self.end_stage(run, Stage::Transformation)?;

        self.checkpoint(run, token, Stage::Derivation)?;
        let previous = self
            .previous_full_files(&key, &setup.configuration)
            .at(Stage::Derivation)?;
        let mut outputs = Vec::new();
        let mut deltas = Vec::new();
        for (schema, data) in &transformed {
            if schema.release_type == ReleaseType::Delta {
                deltas.push((schema.file_name.clone(), data.clone()));
            }
            outputs.extend(derive_outputs(schema, data, &previous).at(Stage::Derivation)?);
        }
        run.note(
            Stage::Derivation,
            format!("{} release files derived", outputs.len()),
        );
        self.end_stage(run, Stage::Derivation)?;

        if setup.configuration.classify_output_files {
            self.checkpoint(run, token, Stage::Classification)?;
            let classified = self
                .classify(&key, setup, &deltas, &previous)
                .at(Stage::Classification)?;
            run.note(
                Stage::Classification,
                format!("{} files from classification", classified.len()),
            );
            outputs.extend(classified);
            self.end_stage(run, Stage::Classification)?;
        }
        Ok(outputs)
    }

    /// Full files of the previous published release, keyed by table name.
    fn previous_full_files(
        &self,
        key: &BuildKey,
        configuration: &BuildConfiguration,
    ) -> PipelineResult<HashMap<String, String>> {
        if configuration.first_time_release {
            return Ok(HashMap::new());
        }
        let Some(archive) = &configuration.previous_published_package else {
            return Ok(HashMap::new());
        };

        let builds = self
            .catalog
            .find_all(&key.center, &key.product, &BuildQuery::default())?;
        for build in builds.content {
            if build.key == *key || !build.tags.contains(&BuildTag::Published) {
                continue;
            }
            let Some(bytes) = self
                .catalog
                .get_file(&build.key, ArtifactKind::OutputFiles, archive)?
            else {
                continue;
            };
            let mut fulls = HashMap::new();
            for (name, content) in unpack_entries(&bytes)? {
                let Ok(schema) = self.collaborators.recognizer.recognize(&name) else {
                    continue;
                };
                if schema.release_type == ReleaseType::Full {
                    fulls.insert(
                        schema.table_name,
                        String::from_utf8_lossy(&content).into_owned(),
                    );
                }
            }
            debug!(build = %key, previous = %build.key, tables = fulls.len(), "previous release loaded");
            return Ok(fulls);
        }
        Err(PipelineError::business(
            Stage::Derivation.as_str(),
            format!("previous published package {archive} not found"),
        ))
    }

    /// Run the classifier over the delta files and derive its output.
    fn classify(
        &self,
        key: &BuildKey,
        setup: &Setup,
        deltas: &[NamedFile],
        previous: &HashMap<String, String>,
    ) -> PipelineResult<Vec<NamedFile>> {
        let classifier = self.collaborators.classifier.as_ref().ok_or_else(|| {
            PipelineError::business(Stage::Classification.as_str(), "no classifier configured")
        })?;

        let mut delta_archive = Vec::new();
        self.collaborators
            .packager
            .package(deltas, &mut delta_archive)?;
        let previous_release = setup
            .qa
            .previous_release
            .as_deref()
            .or(setup.configuration.previous_published_package.as_deref());
        let result = classifier.classify(
            &delta_archive,
            previous_release,
            setup.qa.dependency_release.as_deref(),
        )?;
        self.catalog.put_file(
            key,
            ArtifactKind::Classification,
            &result.file_name,
            &result.content,
        )?;

        let schema = self.collaborators.recognizer.recognize(&result.file_name)?;
        derive_outputs(&schema, &result.content, previous)
    }

    async fn write_readme(
        &self,
        run: &mut Run,
        setup: &Setup,
        outputs: &[NamedFile],
    ) -> PipelineResult<NamedFile> {
        let key = &run.build.key;
        let name = readme::readme_name(setup.effective_time);
        let files: Vec<String> = outputs.iter().map(|(name, _)| name.clone()).collect();
        let content = readme::render(
            &key.product,
            &setup.configuration,
            setup.effective_time,
            &files,
        );

        let object_key = paths::artifact_key(key, ArtifactKind::OutputFiles, &name);
        let (mut writer, handle) = open_sink(self.catalog.store().clone(), &object_key);
        let written = writer
            .write_all(content.as_bytes())
            .and_then(|()| writer.close());
        let uploaded = handle.wait().await;
        written?;
        uploaded?;

        run.note(Stage::Readme, format!("{name} written"));
        Ok((name, content.into_bytes()))
    }

    /// Stream the archive into `output-files/` and return its object key.
    async fn package(
        &self,
        key: &BuildKey,
        archive: &str,
        files: &[NamedFile],
    ) -> PipelineResult<String> {
        let object_key = paths::artifact_key(key, ArtifactKind::OutputFiles, archive);
        let (writer, handle) = open_sink(self.catalog.store().clone(), &object_key);

        let packager = self.collaborators.packager.clone();
        let files = files.to_vec();
        let packaged = tokio::task::spawn_blocking(move || -> PipelineResult<()> {
            let mut writer = writer;
            packager.package(&files, &mut writer)?;
            writer.close()?;
            Ok(())
        })
        .await
        .unwrap_or_else(|e| Err(PipelineError::Io(io::Error::other(e))));
        let uploaded = handle.wait().await;

        packaged?;
        uploaded?;
        Ok(object_key)
    }

    fn post_conditions(&self, run: &mut Run, setup: &Setup, outputs: &[String]) -> Result<(), Halt> {
        let stage = Stage::PostConditions;
        let findings = self
            .collaborators
            .conditions
            .post(&CheckContext {
                build: &run.build,
                configuration: &setup.configuration,
                manifest: &setup.manifest,
                files: outputs,
            })
            .at(stage)?;
        self.catalog
            .save_condition_report(&run.build.key, ConditionPhase::Post, &findings)
            .at(stage)?;

        run.warnings |= findings.iter().any(|f| f.result == CheckResult::Warning);
        let failing: Vec<&str> = findings
            .iter()
            .filter(|f| matches!(f.result, CheckResult::Fail | CheckResult::Fatal))
            .map(|f| f.rule_name.as_str())
            .collect();
        if !failing.is_empty() {
            let message = format!("post-conditions failed: {}", failing.join(", "));
            return Err(self.reject(run, stage, BuildStatus::FailedPostConditions, message));
        }
        Ok(())
    }

    async fn validate(
        &self,
        run: &mut Run,
        token: &CancellationToken,
        setup: &Setup,
        archive_key: &str,
        archive: &str,
    ) -> Result<BuildOutcome, Halt> {
        let stage = Stage::Validation;
        let validator = self.collaborators.validator.clone().ok_or_else(|| {
            Halt::Failed(
                stage,
                PipelineError::business(stage.as_str(), "no release validator configured"),
            )
        })?;

        self.checkpoint(run, token, stage)?;
        let ticket = validator
            .submit(archive_key, &setup.manifest, &setup.qa)
            .at(stage)?;
        self.catalog
            .save_validation_url(&run.build.key, &ticket.url)
            .at(stage)?;
        self.catalog
            .update_status(&mut run.build, BuildStatus::RvfQueued)
            .at(stage)?;
        run.note(stage, format!("submitted for validation: {}", ticket.url));
        self.persist_log(run).at(stage)?;

        let timeout = setup
            .qa
            .validation_timeout_minutes
            .map(|minutes| Duration::from_secs(minutes.saturating_mul(60)))
            .unwrap_or(self.validation_timeout);
        // An unrepresentable deadline means no deadline.
        let deadline = tokio::time::Instant::now().checked_add(timeout);

        loop {
            tokio::time::sleep(self.poll_interval).await;
            self.checkpoint(run, token, stage)?;

            match validator.poll(&ticket).at(stage)? {
                ValidationState::Pending => {}
                ValidationState::Running => self.enter_validation_running(run)?,
                ValidationState::Passed(report) => {
                    self.enter_validation_running(run)?;
                    self.catalog
                        .save_validation_report(&run.build.key, &report)
                        .at(stage)?;
                    return self.release(run, false, archive);
                }
                ValidationState::PassedWithWarnings(report) => {
                    self.enter_validation_running(run)?;
                    self.catalog
                        .save_validation_report(&run.build.key, &report)
                        .at(stage)?;
                    return self.release(run, true, archive);
                }
                ValidationState::Failed(report) => {
                    self.catalog
                        .save_validation_report(&run.build.key, &report)
                        .at(stage)?;
                    let message = "external validation failed".to_string();
                    return Err(self.reject(run, stage, BuildStatus::RvfFailed, message));
                }
            }

            if deadline.is_some_and(|deadline| tokio::time::Instant::now() >= deadline) {
                let message = format!(
                    "external validation timed out after {} minutes",
                    timeout.as_secs() / 60
                );
                self.catalog
                    .save_validation_report(&run.build.key, &json!({ "message": message }))
                    .at(stage)?;
                return Err(self.reject(run, stage, BuildStatus::RvfFailed, message));
            }
        }
    }

    fn enter_validation_running(&self, run: &mut Run) -> Result<(), Halt> {
        if run.build.status != BuildStatus::RvfRunning {
            self.catalog
                .update_status(&mut run.build, BuildStatus::RvfRunning)
                .at(Stage::Validation)?;
            run.note(Stage::Validation, "validation running");
        }
        Ok(())
    }

    fn release(&self, run: &mut Run, warned: bool, archive: &str) -> Result<BuildOutcome, Halt> {
        let stage = if self.offline() {
            Stage::PostConditions
        } else {
            Stage::Validation
        };
        let warnings = run.warnings || warned;
        let status = if warnings {
            BuildStatus::ReleaseCompleteWithWarnings
        } else {
            BuildStatus::ReleaseComplete
        };

        let key = run.build.key.clone();
        let mut report = self.catalog.load_report(&key).at(stage)?.unwrap_or_default();
        report.set_progress("COMPLETED", format!("release {archive} complete"));
        report.add("archive", archive);
        self.catalog.save_report(&key, &report).at(stage)?;
        self.catalog.update_status(&mut run.build, status).at(stage)?;
        run.note(stage, format!("build finished as {status}"));
        self.persist_log(run).at(stage)?;
        Ok(BuildOutcome::Released { warnings })
    }

    // ── Clone ──────────────────────────────────────────────────────

    /// Copy configuration, QA configuration, manifest and inputs into a new build.
    pub fn clone_build(&self, source: &BuildKey) -> PipelineResult<Build> {
        self.clone_build_at(source, Utc::now())
    }

    pub fn clone_build_at(&self, source: &BuildKey, created: DateTime<Utc>) -> PipelineResult<Build> {
        self.catalog.require(source)?;
        let configuration = self.catalog.load_configuration(source)?.unwrap_or_default();
        let qa = self.catalog.load_qa_configuration(source)?;
        let clone =
            self.catalog
                .create_at(&source.center, &source.product, created, configuration, qa)?;
        let mut copied = 0;
        for kind in [ArtifactKind::Manifest, ArtifactKind::InputFiles] {
            copied += self.catalog.copy_files(source, &clone.key, kind)?;
        }
        info!(from = %source, to = %clone.key, files = copied, "build cloned");
        Ok(clone)
    }
}

/// The file itself plus, for a delta, its Snapshot and Full companions.
fn derive_outputs(
    schema: &TableSchema,
    data: &[u8],
    previous: &HashMap<String, String>,
) -> PipelineResult<Vec<NamedFile>> {
    let mut files = vec![(schema.file_name.clone(), data.to_vec())];
    if schema.release_type != ReleaseType::Delta {
        return Ok(files);
    }
    let (Some(full_name), Some(snapshot_name)) = (
        derived_name(&schema.file_name, ReleaseType::Full),
        derived_name(&schema.file_name, ReleaseType::Snapshot),
    ) else {
        return Ok(files);
    };

    let delta = std::str::from_utf8(data).map_err(|e| {
        PipelineError::business(
            Stage::Derivation.as_str(),
            format!("{} is not UTF-8: {e}", schema.file_name),
        )
    })?;
    let full = derive_full(previous.get(&schema.table_name).map(String::as_str), delta);
    let snapshot = derive_snapshot(&full);
    files.push((snapshot_name, snapshot.into_bytes()));
    files.push((full_name, full.into_bytes()));
    Ok(files)
}

/// Strip a UTF-8 BOM and turn bare LF line endings into CRLF.
fn fix_input(data: &[u8]) -> Vec<u8> {
    let data = data.strip_prefix(UTF8_BOM).unwrap_or(data);
    let mut out = Vec::with_capacity(data.len() + data.len() / 32);
    let mut previous = 0u8;
    for &byte in data {
        if byte == b'\n' && previous != b'\r' {
            out.push(b'\r');
        }
        out.push(byte);
        previous = byte;
    }
    out
}
