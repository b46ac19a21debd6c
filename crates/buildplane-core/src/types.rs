//! Shared types used across Buildplane crates.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// strftime pattern for build ids. Lexicographic order equals creation order.
pub const BUILD_ID_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Render a creation timestamp as a build id.
pub fn build_id_at(created: DateTime<Utc>) -> String {
    created.format(BUILD_ID_FORMAT).to_string()
}

/// A string that did not name a known enum value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value:?}")]
pub struct ParseValueError {
    pub kind: &'static str,
    pub value: String,
}

// ── Identity ───────────────────────────────────────────────────────

/// Identity of a build: release center, product and creation-time id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BuildKey {
    pub center: String,
    pub product: String,
    pub build_id: String,
}

impl BuildKey {
    pub fn new(center: &str, product: &str, build_id: &str) -> Self {
        Self {
            center: center.to_string(),
            product: product.to_string(),
            build_id: build_id.to_string(),
        }
    }

    /// Year the build was created in, taken from the id prefix.
    pub fn year(&self) -> Option<i32> {
        self.build_id.get(..4)?.parse().ok()
    }
}

impl fmt::Display for BuildKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.center, self.product, self.build_id)
    }
}

// ── Status ─────────────────────────────────────────────────────────

/// Lifecycle status of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildStatus {
    BeforeTrigger,
    Building,
    Built,
    RvfQueued,
    RvfRunning,
    RvfFailed,
    FailedInputGatherReportValidation,
    FailedInputPrepareReportValidation,
    FailedPreConditions,
    FailedPostConditions,
    CancelRequested,
    Cancelled,
    Failed,
    ReleaseComplete,
    ReleaseCompleteWithWarnings,
}

impl BuildStatus {
    pub const ALL: [BuildStatus; 15] = [
        BuildStatus::BeforeTrigger,
        BuildStatus::Building,
        BuildStatus::Built,
        BuildStatus::RvfQueued,
        BuildStatus::RvfRunning,
        BuildStatus::RvfFailed,
        BuildStatus::FailedInputGatherReportValidation,
        BuildStatus::FailedInputPrepareReportValidation,
        BuildStatus::FailedPreConditions,
        BuildStatus::FailedPostConditions,
        BuildStatus::CancelRequested,
        BuildStatus::Cancelled,
        BuildStatus::Failed,
        BuildStatus::ReleaseComplete,
        BuildStatus::ReleaseCompleteWithWarnings,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::BeforeTrigger => "BEFORE_TRIGGER",
            BuildStatus::Building => "BUILDING",
            BuildStatus::Built => "BUILT",
            BuildStatus::RvfQueued => "RVF_QUEUED",
            BuildStatus::RvfRunning => "RVF_RUNNING",
            BuildStatus::RvfFailed => "RVF_FAILED",
            BuildStatus::FailedInputGatherReportValidation => {
                "FAILED_INPUT_GATHER_REPORT_VALIDATION"
            }
            BuildStatus::FailedInputPrepareReportValidation => {
                "FAILED_INPUT_PREPARE_REPORT_VALIDATION"
            }
            BuildStatus::FailedPreConditions => "FAILED_PRE_CONDITIONS",
            BuildStatus::FailedPostConditions => "FAILED_POST_CONDITIONS",
            BuildStatus::CancelRequested => "CANCEL_REQUESTED",
            BuildStatus::Cancelled => "CANCELLED",
            BuildStatus::Failed => "FAILED",
            BuildStatus::ReleaseComplete => "RELEASE_COMPLETE",
            BuildStatus::ReleaseCompleteWithWarnings => "RELEASE_COMPLETE_WITH_WARNINGS",
        }
    }

    /// No transition may leave a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildStatus::FailedInputGatherReportValidation
                | BuildStatus::FailedInputPrepareReportValidation
                | BuildStatus::FailedPreConditions
                | BuildStatus::FailedPostConditions
                | BuildStatus::Failed
                | BuildStatus::Cancelled
                | BuildStatus::ReleaseComplete
                | BuildStatus::ReleaseCompleteWithWarnings
        )
    }

    /// Whether the pipeline has stopped working on the build.
    ///
    /// Same as [`is_terminal`](Self::is_terminal) plus `RVF_FAILED`, which
    /// still admits a validation re-submission.
    pub fn is_finished(&self) -> bool {
        self.is_terminal() || *self == BuildStatus::RvfFailed
    }

    /// Ranks status markers that coexist on one build.
    ///
    /// That only happens when a transition wrote its new marker but never
    /// deleted the old one. A terminal marker outranks any other, since no
    /// transition leaves a terminal status; otherwise the status further
    /// along the lifecycle wins.
    pub fn marker_precedence(&self) -> (bool, BuildStatus) {
        (self.is_terminal(), *self)
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildStatus {
    type Err = ParseValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BuildStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseValueError {
                kind: "build status",
                value: s.to_string(),
            })
    }
}

// ── Tags ───────────────────────────────────────────────────────────

/// Release tag attached to a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildTag {
    Alpha,
    Beta,
    PreProduction,
    Published,
}

impl BuildTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildTag::Alpha => "ALPHA",
            BuildTag::Beta => "BETA",
            BuildTag::PreProduction => "PRE_PRODUCTION",
            BuildTag::Published => "PUBLISHED",
        }
    }
}

impl fmt::Display for BuildTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildTag {
    type Err = ParseValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ALPHA" => Ok(BuildTag::Alpha),
            "BETA" => Ok(BuildTag::Beta),
            "PRE_PRODUCTION" => Ok(BuildTag::PreProduction),
            "PUBLISHED" => Ok(BuildTag::Published),
            other => Err(ParseValueError {
                kind: "build tag",
                value: other.to_string(),
            }),
        }
    }
}

// ── Configuration blobs ────────────────────────────────────────────

/// Build configuration persisted as `config.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfiguration {
    /// Effective date stamped on the release.
    pub effective_time: Option<NaiveDate>,
    pub first_time_release: bool,
    pub beta_release: bool,
    pub daily_build: bool,
    /// Copy inputs straight to the package, skipping transformation.
    pub just_package: bool,
    /// Normalise input files (BOM, line endings) before transformation.
    pub input_files_fix_required: bool,
    /// Run the external classifier over the delta output.
    pub classify_output_files: bool,
    /// Archive name of the previously published release.
    pub previous_published_package: Option<String>,
    pub readme_header: Option<String>,
    pub readme_end_date: Option<String>,
    pub licence_statement: Option<String>,
    pub extension: Option<ExtensionConfig>,
}

/// Extra settings for extension (non-international) releases.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtensionConfig {
    pub dependency_release: Option<String>,
    pub module_id: Option<String>,
    pub namespace_id: Option<String>,
}

/// QA configuration persisted as `qa-config.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QaConfiguration {
    pub assertion_group_names: Vec<String>,
    pub previous_release: Option<String>,
    pub dependency_release: Option<String>,
    pub enable_drools: bool,
    pub drools_rules_group_names: Vec<String>,
    pub enable_mrcm_validation: bool,
    /// Ceiling for external validation; the pipeline default applies when unset.
    pub validation_timeout_minutes: Option<u64>,
}

// ── Reports ────────────────────────────────────────────────────────

/// Structured per-build report persisted as `report.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildReport {
    #[serde(flatten)]
    pub entries: BTreeMap<String, serde_json::Value>,
}

impl BuildReport {
    pub const PROGRESS_STATUS: &'static str = "progress_status";
    pub const MESSAGE: &'static str = "message";

    pub fn add(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.entries.insert(key.to_string(), value.into());
    }

    /// Record the overall outcome together with a human-readable reason.
    pub fn set_progress(&mut self, status: &str, message: impl Into<String>) {
        self.add(Self::PROGRESS_STATUS, status);
        self.add(Self::MESSAGE, message.into());
    }

    pub fn progress_status(&self) -> Option<&str> {
        self.entries.get(Self::PROGRESS_STATUS)?.as_str()
    }

    pub fn message(&self) -> Option<&str> {
        self.entries.get(Self::MESSAGE)?.as_str()
    }
}

/// Outcome of one pre- or post-condition rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckResult {
    Pass,
    Warning,
    Fail,
    Fatal,
}

/// A single condition-check finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionCheckReport {
    pub rule_name: String,
    pub result: CheckResult,
    #[serde(default)]
    pub message: String,
}

impl ConditionCheckReport {
    pub fn new(rule_name: &str, result: CheckResult, message: impl Into<String>) -> Self {
        Self {
            rule_name: rule_name.to_string(),
            result,
            message: message.into(),
        }
    }
}

/// Which side of the transformation a condition report belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionPhase {
    Pre,
    Post,
}

/// Report written by the input gathering/preparation subsystems.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputReport {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub details: BTreeMap<String, serde_json::Value>,
}

impl InputReport {
    pub const COMPLETED: &'static str = "COMPLETED";

    pub fn completed() -> Self {
        Self {
            status: Self::COMPLETED.to_string(),
            message: None,
            details: BTreeMap::new(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == Self::COMPLETED
    }
}
