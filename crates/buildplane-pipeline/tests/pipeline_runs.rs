//! Orchestrator runs against an in-memory store with scripted collaborators.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, TimeZone, Utc};
use serde_json::json;

use buildplane_catalog::{ArtifactKind, BuildCatalog, InputReportKind};
use buildplane_core::config::PipelineConfig;
use buildplane_core::{
    BuildConfiguration, BuildKey, BuildStatus, BuildTag, CheckResult, ConditionCheckReport,
    ConditionPhase, InputReport, QaConfiguration,
};
use buildplane_pipeline::package::unpack_entries;
use buildplane_pipeline::{
    ArchivePackager, BuildOutcome, CancellationToken, CheckContext, ClassificationResult,
    Classifier, Collaborators, ConditionChecker, ContentTransformer, ManifestListing, Orchestrator,
    PipelineError, PipelineResult, ReleaseValidator, TableSchema,
    TarPackager, ValidationState, ValidationTicket,
};
use buildplane_store::{ObjectStore, RedbObjectStore};

const CENTER: &str = "international";
const PRODUCT: &str = "snomedct";
const DELTA: &str = "sct2_Concept_Delta_INT_20240701.txt";
const DELTA_CONTENT: &str = "id\teffectiveTime\tactive\r\n100\t20240701\t1\r\n";

// ── Fixtures ────────────────────────────────────────────────────────

fn catalog(offline: bool) -> (Arc<RedbObjectStore>, BuildCatalog) {
    let store = Arc::new(RedbObjectStore::open_in_memory().unwrap());
    let catalog = BuildCatalog::new(store.clone(), offline);
    (store, catalog)
}

fn configuration() -> BuildConfiguration {
    BuildConfiguration {
        effective_time: NaiveDate::from_ymd_opt(2024, 7, 1),
        first_time_release: true,
        ..Default::default()
    }
}

fn seed_with(catalog: &BuildCatalog, configuration: BuildConfiguration) -> BuildKey {
    let created = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap();
    let build = catalog
        .create_at(CENTER, PRODUCT, created, configuration, None)
        .unwrap();
    catalog
        .put_file(&build.key, ArtifactKind::InputFiles, DELTA, DELTA_CONTENT.as_bytes())
        .unwrap();
    build.key
}

fn seed(catalog: &BuildCatalog) -> BuildKey {
    seed_with(catalog, configuration())
}

fn orchestrator(catalog: &BuildCatalog, collaborators: Collaborators) -> Orchestrator {
    Orchestrator::new(catalog.clone(), collaborators, &PipelineConfig::default())
}

fn status(catalog: &BuildCatalog, key: &BuildKey) -> BuildStatus {
    catalog.require(key).unwrap().status
}

fn status_marker_count(store: &RedbObjectStore, key: &BuildKey) -> usize {
    store
        .list(&format!("{}/{}/{}/status:", key.center, key.product, key.build_id))
        .unwrap()
        .len()
}

struct ScriptedValidator {
    states: Mutex<VecDeque<ValidationState>>,
    submitted: Mutex<Vec<String>>,
}

impl ScriptedValidator {
    fn new(states: Vec<ValidationState>) -> Arc<Self> {
        Arc::new(Self {
            states: Mutex::new(states.into()),
            submitted: Mutex::new(Vec::new()),
        })
    }
}

impl ReleaseValidator for ScriptedValidator {
    fn submit(
        &self,
        archive_key: &str,
        _manifest: &ManifestListing,
        _qa: &QaConfiguration,
    ) -> PipelineResult<ValidationTicket> {
        self.submitted.lock().unwrap().push(archive_key.to_string());
        Ok(ValidationTicket {
            id: "run-1".into(),
            url: "https://rvf.example/run-1".into(),
        })
    }

    fn poll(&self, _ticket: &ValidationTicket) -> PipelineResult<ValidationState> {
        Ok(self
            .states
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ValidationState::Pending))
    }
}

/// Reports fixed findings for one phase.
struct FixedFindings {
    phase: ConditionPhase,
    findings: Vec<ConditionCheckReport>,
}

impl ConditionChecker for FixedFindings {
    fn pre(&self, _ctx: &CheckContext<'_>) -> PipelineResult<Vec<ConditionCheckReport>> {
        Ok(match self.phase {
            ConditionPhase::Pre => self.findings.clone(),
            ConditionPhase::Post => Vec::new(),
        })
    }

    fn post(&self, _ctx: &CheckContext<'_>) -> PipelineResult<Vec<ConditionCheckReport>> {
        Ok(match self.phase {
            ConditionPhase::Post => self.findings.clone(),
            ConditionPhase::Pre => Vec::new(),
        })
    }
}

/// Persists CANCEL_REQUESTED while the pre-conditions run.
struct CancelDuringPreConditions {
    catalog: BuildCatalog,
}

impl ConditionChecker for CancelDuringPreConditions {
    fn pre(&self, ctx: &CheckContext<'_>) -> PipelineResult<Vec<ConditionCheckReport>> {
        let mut build = ctx.build.clone();
        self.catalog
            .update_status(&mut build, BuildStatus::CancelRequested)?;
        Ok(Vec::new())
    }

    fn post(&self, _ctx: &CheckContext<'_>) -> PipelineResult<Vec<ConditionCheckReport>> {
        Ok(Vec::new())
    }
}

struct CancellingTransformer(CancellationToken);

impl ContentTransformer for CancellingTransformer {
    fn transform(&self, _schema: &TableSchema, input: &[u8]) -> PipelineResult<Vec<u8>> {
        self.0.cancel();
        Ok(input.to_vec())
    }
}

struct FailingTransformer;

impl ContentTransformer for FailingTransformer {
    fn transform(&self, _schema: &TableSchema, _input: &[u8]) -> PipelineResult<Vec<u8>> {
        Err(PipelineError::collaborator("transformer", "column count mismatch"))
    }
}

struct FixedClassifier;

impl Classifier for FixedClassifier {
    fn classify(
        &self,
        delta_archive: &[u8],
        _previous_release: Option<&str>,
        _dependency_release: Option<&str>,
    ) -> PipelineResult<ClassificationResult> {
        let entries = unpack_entries(delta_archive)?;
        assert_eq!(entries.len(), 1);
        Ok(ClassificationResult {
            file_name: "sct2_Relationship_Delta_INT_20240701.txt".into(),
            content: b"id\teffectiveTime\r\n900\t20240701\r\n".to_vec(),
        })
    }
}

// ── Offline runs ────────────────────────────────────────────────────

#[tokio::test]
async fn offline_run_releases_and_packages() {
    let (store, catalog) = catalog(true);
    let key = seed(&catalog);

    let outcome = orchestrator(&catalog, Collaborators::default())
        .run(&key, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, BuildOutcome::Released { warnings: false });
    assert_eq!(status(&catalog, &key), BuildStatus::ReleaseComplete);
    assert_eq!(status_marker_count(&store, &key), 1);

    let outputs = catalog.list_files(&key, ArtifactKind::OutputFiles).unwrap();
    assert_eq!(
        outputs,
        vec![
            "Readme_en_20240701.txt",
            "sct2_Concept_Delta_INT_20240701.txt",
            "sct2_Concept_Full_INT_20240701.txt",
            "sct2_Concept_Snapshot_INT_20240701.txt",
            "snomedct_20240701.tar",
        ]
    );

    let archive = catalog
        .get_file(&key, ArtifactKind::OutputFiles, "snomedct_20240701.tar")
        .unwrap()
        .unwrap();
    let names: Vec<String> = unpack_entries(&archive)
        .unwrap()
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(
        names,
        vec![
            "sct2_Concept_Delta_INT_20240701.txt",
            "sct2_Concept_Snapshot_INT_20240701.txt",
            "sct2_Concept_Full_INT_20240701.txt",
            "Readme_en_20240701.txt",
        ]
    );

    let transformed = catalog.list_files(&key, ArtifactKind::TransformedFiles).unwrap();
    assert_eq!(transformed, vec![DELTA.to_string()]);

    let report = catalog.load_report(&key).unwrap().unwrap();
    assert_eq!(report.progress_status(), Some("COMPLETED"));

    let log = catalog
        .get_file(&key, ArtifactKind::Logs, "pipeline.log")
        .unwrap()
        .unwrap();
    let log = String::from_utf8(log).unwrap();
    assert!(log.contains("[packaging]"));
    assert!(log.contains("RELEASE_COMPLETE"));
}

#[tokio::test]
async fn post_condition_warning_releases_with_warnings() {
    let (_store, catalog) = catalog(true);
    let key = seed(&catalog);
    let checker = FixedFindings {
        phase: ConditionPhase::Post,
        findings: vec![ConditionCheckReport::new(
            "readme-date",
            CheckResult::Warning,
            "readme end date missing",
        )],
    };

    let outcome = orchestrator(
        &catalog,
        Collaborators::default().with_conditions(Arc::new(checker)),
    )
    .run(&key, &CancellationToken::new())
    .await
    .unwrap();

    assert_eq!(outcome, BuildOutcome::Released { warnings: true });
    assert_eq!(status(&catalog, &key), BuildStatus::ReleaseCompleteWithWarnings);
    let post = catalog
        .load_condition_report(&key, ConditionPhase::Post)
        .unwrap()
        .unwrap();
    assert_eq!(post.len(), 1);
}

#[tokio::test]
async fn failing_post_condition_rejects_the_build() {
    let (_store, catalog) = catalog(true);
    let key = seed(&catalog);
    let checker = FixedFindings {
        phase: ConditionPhase::Post,
        findings: vec![ConditionCheckReport::new(
            "file-count",
            CheckResult::Fail,
            "expected 6 files",
        )],
    };

    let outcome = orchestrator(
        &catalog,
        Collaborators::default().with_conditions(Arc::new(checker)),
    )
    .run(&key, &CancellationToken::new())
    .await
    .unwrap();

    assert_eq!(outcome, BuildOutcome::Rejected(BuildStatus::FailedPostConditions));
    assert_eq!(status(&catalog, &key), BuildStatus::FailedPostConditions);
}

#[tokio::test]
async fn fatal_pre_condition_stops_before_building() {
    let (store, catalog) = catalog(true);
    let key = seed(&catalog);
    let checker = FixedFindings {
        phase: ConditionPhase::Pre,
        findings: vec![ConditionCheckReport::new(
            "effective-time",
            CheckResult::Fatal,
            "effective time precedes the previous release",
        )],
    };

    let outcome = orchestrator(
        &catalog,
        Collaborators::default().with_conditions(Arc::new(checker)),
    )
    .run(&key, &CancellationToken::new())
    .await
    .unwrap();

    assert_eq!(outcome, BuildOutcome::Rejected(BuildStatus::FailedPreConditions));
    assert_eq!(status(&catalog, &key), BuildStatus::FailedPreConditions);
    assert_eq!(status_marker_count(&store, &key), 1);
    let pre = catalog
        .load_condition_report(&key, ConditionPhase::Pre)
        .unwrap()
        .unwrap();
    assert_eq!(pre[0].result, CheckResult::Fatal);
    assert!(
        catalog
            .list_files(&key, ArtifactKind::TransformedFiles)
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn invalid_input_gather_report_rejects_the_build() {
    let (_store, catalog) = catalog(true);
    let key = seed(&catalog);
    let report = InputReport {
        status: "FAILED".into(),
        message: Some("2 files missing".into()),
        details: Default::default(),
    };
    catalog
        .save_input_report(&key, InputReportKind::Gather, &report)
        .unwrap();

    let outcome = orchestrator(&catalog, Collaborators::default())
        .run(&key, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        outcome,
        BuildOutcome::Rejected(BuildStatus::FailedInputGatherReportValidation)
    );
    let stored = catalog.load_report(&key).unwrap().unwrap();
    assert!(stored.message().unwrap().contains("2 files missing"));
}

#[tokio::test]
async fn stage_failure_persists_report_then_fails() {
    let (store, catalog) = catalog(true);
    let key = seed(&catalog);

    let outcome = orchestrator(
        &catalog,
        Collaborators::default().with_transformer(Arc::new(FailingTransformer)),
    )
    .run(&key, &CancellationToken::new())
    .await
    .unwrap();

    let BuildOutcome::Failed(message) = outcome else {
        panic!("expected a failed outcome, got {outcome:?}");
    };
    assert!(message.starts_with("transformation:"), "{message}");
    assert!(message.contains("column count mismatch"));

    assert_eq!(status(&catalog, &key), BuildStatus::Failed);
    assert_eq!(status_marker_count(&store, &key), 1);
    let report = catalog.load_report(&key).unwrap().unwrap();
    assert_eq!(report.progress_status(), Some("FAILED"));
    assert_eq!(report.message(), Some(message.as_str()));
    assert_eq!(report.entries["failed_stage"], json!("transformation"));
}

#[tokio::test]
async fn missing_effective_time_fails_in_configuration() {
    let (_store, catalog) = catalog(true);
    let key = seed_with(&catalog, BuildConfiguration::default());

    let outcome = orchestrator(&catalog, Collaborators::default())
        .run(&key, &CancellationToken::new())
        .await
        .unwrap();

    let BuildOutcome::Failed(message) = outcome else {
        panic!("expected a failed outcome, got {outcome:?}");
    };
    assert!(message.contains("effective time"), "{message}");
    assert_eq!(status(&catalog, &key), BuildStatus::Failed);
}

#[tokio::test]
async fn builds_outside_before_trigger_cannot_run() {
    let (_store, catalog) = catalog(true);
    let key = seed(&catalog);
    let mut build = catalog.require(&key).unwrap();
    catalog.update_status(&mut build, BuildStatus::Building).unwrap();

    let result = orchestrator(&catalog, Collaborators::default())
        .run(&key, &CancellationToken::new())
        .await;
    assert!(result.is_err());
    assert_eq!(status(&catalog, &key), BuildStatus::Building);
}

// ── Cancellation ────────────────────────────────────────────────────

#[tokio::test]
async fn cancelled_token_cancels_before_any_stage() {
    let (store, catalog) = catalog(true);
    let key = seed(&catalog);
    let token = CancellationToken::new();
    token.cancel();

    let outcome = orchestrator(&catalog, Collaborators::default())
        .run(&key, &token)
        .await
        .unwrap();

    assert_eq!(outcome, BuildOutcome::Cancelled);
    assert_eq!(status(&catalog, &key), BuildStatus::Cancelled);
    assert_eq!(status_marker_count(&store, &key), 1);
}

#[tokio::test]
async fn token_cancelled_mid_run_stops_at_next_checkpoint() {
    let (_store, catalog) = catalog(true);
    let key = seed(&catalog);
    let token = CancellationToken::new();

    let outcome = orchestrator(
        &catalog,
        Collaborators::default().with_transformer(Arc::new(CancellingTransformer(token.clone()))),
    )
    .run(&key, &token)
    .await
    .unwrap();

    assert_eq!(outcome, BuildOutcome::Cancelled);
    assert_eq!(status(&catalog, &key), BuildStatus::Cancelled);
    // Output produced before the checkpoint is kept.
    assert_eq!(
        catalog.list_files(&key, ArtifactKind::TransformedFiles).unwrap(),
        vec![DELTA.to_string()]
    );
    assert!(
        catalog
            .list_files(&key, ArtifactKind::OutputFiles)
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn persisted_cancel_request_is_honoured() {
    let (_store, catalog) = catalog(true);
    let key = seed(&catalog);
    let checker = CancelDuringPreConditions {
        catalog: catalog.clone(),
    };

    let outcome = orchestrator(
        &catalog,
        Collaborators::default().with_conditions(Arc::new(checker)),
    )
    .run(&key, &CancellationToken::new())
    .await
    .unwrap();

    assert_eq!(outcome, BuildOutcome::Cancelled);
    assert_eq!(status(&catalog, &key), BuildStatus::Cancelled);
    let log = catalog
        .get_file(&key, ArtifactKind::Logs, "pipeline.log")
        .unwrap()
        .unwrap();
    assert!(!String::from_utf8(log).unwrap().contains("build triggered"));
}

// ── External validation ─────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn online_run_goes_through_validation() {
    let (store, catalog) = catalog(false);
    let key = seed(&catalog);
    let validator = ScriptedValidator::new(vec![
        ValidationState::Pending,
        ValidationState::Running,
        ValidationState::Passed(json!({"failures": 0})),
    ]);

    let outcome = orchestrator(
        &catalog,
        Collaborators::default().with_validator(validator.clone()),
    )
    .run(&key, &CancellationToken::new())
    .await
    .unwrap();

    assert_eq!(outcome, BuildOutcome::Released { warnings: false });
    assert_eq!(status(&catalog, &key), BuildStatus::ReleaseComplete);
    assert_eq!(status_marker_count(&store, &key), 1);
    assert_eq!(
        validator.submitted.lock().unwrap().clone(),
        vec![format!(
            "{CENTER}/{PRODUCT}/{}/output-files/snomedct_20240701.tar",
            key.build_id
        )]
    );
    assert_eq!(
        catalog.validation_url(&key).unwrap().as_deref(),
        Some("https://rvf.example/run-1")
    );
    assert_eq!(
        catalog.load_validation_report(&key).unwrap(),
        Some(json!({"failures": 0}))
    );
}

#[tokio::test(start_paused = true)]
async fn passed_with_warnings_releases_with_warnings() {
    let (_store, catalog) = catalog(false);
    let key = seed(&catalog);
    let validator = ScriptedValidator::new(vec![ValidationState::PassedWithWarnings(
        json!({"warnings": 3}),
    )]);

    let outcome = orchestrator(&catalog, Collaborators::default().with_validator(validator))
        .run(&key, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, BuildOutcome::Released { warnings: true });
    assert_eq!(status(&catalog, &key), BuildStatus::ReleaseCompleteWithWarnings);
}

#[tokio::test(start_paused = true)]
async fn failed_validation_moves_to_rvf_failed() {
    let (_store, catalog) = catalog(false);
    let key = seed(&catalog);
    let validator = ScriptedValidator::new(vec![
        ValidationState::Running,
        ValidationState::Failed(json!({"failures": 12})),
    ]);

    let outcome = orchestrator(&catalog, Collaborators::default().with_validator(validator))
        .run(&key, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, BuildOutcome::Rejected(BuildStatus::RvfFailed));
    assert_eq!(status(&catalog, &key), BuildStatus::RvfFailed);
    assert_eq!(
        catalog.load_validation_report(&key).unwrap(),
        Some(json!({"failures": 12}))
    );
}

#[tokio::test(start_paused = true)]
async fn validation_times_out() {
    let (_store, catalog) = catalog(false);
    let created = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap();
    let qa = QaConfiguration {
        validation_timeout_minutes: Some(1),
        ..Default::default()
    };
    let build = catalog
        .create_at(CENTER, PRODUCT, created, configuration(), Some(qa))
        .unwrap();
    catalog
        .put_file(&build.key, ArtifactKind::InputFiles, DELTA, DELTA_CONTENT.as_bytes())
        .unwrap();
    let validator = ScriptedValidator::new(Vec::new());

    let outcome = orchestrator(&catalog, Collaborators::default().with_validator(validator))
        .run(&build.key, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, BuildOutcome::Rejected(BuildStatus::RvfFailed));
    let report = catalog.load_validation_report(&build.key).unwrap().unwrap();
    assert!(report["message"].as_str().unwrap().contains("timed out"));
}

#[tokio::test(start_paused = true)]
async fn unbounded_validation_timeout_keeps_polling() {
    let (_store, catalog) = catalog(false);
    let created = Utc.with_ymd_and_hms(2024, 6, 16, 12, 0, 0).unwrap();
    let qa = QaConfiguration {
        validation_timeout_minutes: Some(u64::MAX),
        ..Default::default()
    };
    let build = catalog
        .create_at(CENTER, PRODUCT, created, configuration(), Some(qa))
        .unwrap();
    catalog
        .put_file(&build.key, ArtifactKind::InputFiles, DELTA, DELTA_CONTENT.as_bytes())
        .unwrap();
    let validator = ScriptedValidator::new(vec![
        ValidationState::Pending,
        ValidationState::Running,
        ValidationState::Passed(json!({"failures": 0})),
    ]);

    let outcome = orchestrator(&catalog, Collaborators::default().with_validator(validator))
        .run(&build.key, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, BuildOutcome::Released { warnings: false });
}

#[tokio::test]
async fn online_run_without_validator_fails() {
    let (_store, catalog) = catalog(false);
    let key = seed(&catalog);

    let outcome = orchestrator(&catalog, Collaborators::default())
        .run(&key, &CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(outcome, BuildOutcome::Failed(_)));
    assert_eq!(status(&catalog, &key), BuildStatus::Failed);
}

// ── Derivation, classification, clone ───────────────────────────────

#[tokio::test]
async fn full_file_extends_the_previous_published_release() {
    let (_store, catalog) = catalog(true);

    let previous_created = Utc.with_ymd_and_hms(2024, 1, 31, 8, 0, 0).unwrap();
    let mut previous = catalog
        .create_at(CENTER, PRODUCT, previous_created, configuration(), None)
        .unwrap();
    let mut archive = Vec::new();
    TarPackager
        .package(
            &[(
                "sct2_Concept_Full_INT_20240131.txt".to_string(),
                b"id\teffectiveTime\tactive\r\n100\t20240131\t1\r\n".to_vec(),
            )],
            &mut archive,
        )
        .unwrap();
    catalog
        .put_file(
            &previous.key,
            ArtifactKind::OutputFiles,
            "snomedct_20240131.tar",
            &archive,
        )
        .unwrap();
    catalog.add_tags(&mut previous, &[BuildTag::Published]).unwrap();

    let key = seed_with(
        &catalog,
        BuildConfiguration {
            first_time_release: false,
            previous_published_package: Some("snomedct_20240131.tar".into()),
            ..configuration()
        },
    );

    let outcome = orchestrator(&catalog, Collaborators::default())
        .run(&key, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, BuildOutcome::Released { warnings: false });

    let full = catalog
        .get_file(&key, ArtifactKind::OutputFiles, "sct2_Concept_Full_INT_20240701.txt")
        .unwrap()
        .unwrap();
    assert_eq!(
        String::from_utf8(full).unwrap(),
        "id\teffectiveTime\tactive\r\n100\t20240131\t1\r\n100\t20240701\t1\r\n"
    );
    let snapshot = catalog
        .get_file(
            &key,
            ArtifactKind::OutputFiles,
            "sct2_Concept_Snapshot_INT_20240701.txt",
        )
        .unwrap()
        .unwrap();
    assert_eq!(String::from_utf8(snapshot).unwrap(), DELTA_CONTENT);
}

#[tokio::test]
async fn missing_previous_release_fails_derivation() {
    let (_store, catalog) = catalog(true);
    let key = seed_with(
        &catalog,
        BuildConfiguration {
            first_time_release: false,
            previous_published_package: Some("snomedct_20200131.tar".into()),
            ..configuration()
        },
    );

    let outcome = orchestrator(&catalog, Collaborators::default())
        .run(&key, &CancellationToken::new())
        .await
        .unwrap();

    let BuildOutcome::Failed(message) = outcome else {
        panic!("expected a failed outcome, got {outcome:?}");
    };
    assert!(message.starts_with("derivation:"), "{message}");
}

#[tokio::test]
async fn classification_output_is_folded_into_the_release() {
    let (_store, catalog) = catalog(true);
    let key = seed_with(
        &catalog,
        BuildConfiguration {
            classify_output_files: true,
            ..configuration()
        },
    );

    let outcome = orchestrator(
        &catalog,
        Collaborators::default().with_classifier(Arc::new(FixedClassifier)),
    )
    .run(&key, &CancellationToken::new())
    .await
    .unwrap();
    assert_eq!(outcome, BuildOutcome::Released { warnings: false });

    assert_eq!(
        catalog.list_files(&key, ArtifactKind::Classification).unwrap(),
        vec!["sct2_Relationship_Delta_INT_20240701.txt".to_string()]
    );
    let outputs = catalog.list_files(&key, ArtifactKind::OutputFiles).unwrap();
    assert!(outputs.contains(&"sct2_Relationship_Snapshot_INT_20240701.txt".to_string()));
    assert!(outputs.contains(&"sct2_Relationship_Full_INT_20240701.txt".to_string()));
}

#[tokio::test]
async fn clone_copies_configuration_and_inputs() {
    let (_store, catalog) = catalog(true);
    let key = seed(&catalog);
    catalog
        .put_file(&key, ArtifactKind::Manifest, "manifest.json", br#"{"files":[]}"#)
        .unwrap();
    let orchestrator = orchestrator(&catalog, Collaborators::default());

    let created = Utc.with_ymd_and_hms(2024, 6, 16, 12, 0, 0).unwrap();
    let clone = orchestrator.clone_build_at(&key, created).unwrap();

    assert_ne!(clone.key, key);
    assert_eq!(clone.status, BuildStatus::BeforeTrigger);
    assert_eq!(
        catalog.load_configuration(&clone.key).unwrap(),
        Some(configuration())
    );
    assert_eq!(
        catalog.list_files(&clone.key, ArtifactKind::InputFiles).unwrap(),
        vec![DELTA.to_string()]
    );
    assert_eq!(
        catalog.list_files(&clone.key, ArtifactKind::Manifest).unwrap(),
        vec!["manifest.json".to_string()]
    );

    let outcome = orchestrator
        .run(&clone.key, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, BuildOutcome::Released { warnings: false });
}
