//! Comparison report types, persisted as JSON through the catalog.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use buildplane_core::BuildKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComparisonStatus {
    Queued,
    Running,
    Completed,
    FailedToCompare,
}

impl ComparisonStatus {
    /// Queued, running and completed reports are never queued again.
    pub fn blocks_requeue(&self) -> bool {
        !matches!(self, ComparisonStatus::FailedToCompare)
    }

    /// Work a restarted engine still owes.
    pub fn is_pending(&self) -> bool {
        matches!(self, ComparisonStatus::Queued | ComparisonStatus::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Pass,
    Fail,
}

/// Outcome of one comparator in the battery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparatorResult {
    pub name: String,
    pub verdict: Verdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ComparatorResult {
    pub fn pass(name: &str) -> Self {
        Self {
            name: name.to_string(),
            verdict: Verdict::Pass,
            detail: None,
        }
    }

    pub fn fail(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            verdict: Verdict::Fail,
            detail: Some(detail.into()),
        }
    }
}

/// Whole-build comparison, stored at `comparisons/{compare_id}.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildComparisonReport {
    pub compare_id: String,
    pub left: BuildKey,
    pub right: BuildKey,
    pub status: ComparisonStatus,
    /// Set once the battery has run: `PASS` iff every comparator passed.
    #[serde(default)]
    pub verdict: Option<Verdict>,
    #[serde(default)]
    pub results: Vec<ComparatorResult>,
    #[serde(default)]
    pub message: Option<String>,
    pub requested_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl BuildComparisonReport {
    pub fn queued(compare_id: &str, left: &BuildKey, right: &BuildKey) -> Self {
        Self {
            compare_id: compare_id.to_string(),
            left: left.clone(),
            right: right.clone(),
            status: ComparisonStatus::Queued,
            verdict: None,
            results: Vec::new(),
            message: None,
            requested_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn complete(&mut self, results: Vec<ComparatorResult>) {
        let passed = results.iter().all(|r| r.verdict == Verdict::Pass);
        self.verdict = Some(if passed { Verdict::Pass } else { Verdict::Fail });
        self.results = results;
        self.status = ComparisonStatus::Completed;
        self.message = None;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = ComparisonStatus::FailedToCompare;
        self.message = Some(message.into());
        self.completed_at = Some(Utc::now());
    }
}

/// A row whose identity key survived while its content changed or moved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedRow {
    pub left: String,
    pub right: String,
}

/// Single-file diff, stored at `comparisons/{compare_id}/files/{file}.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDiffReport {
    pub compare_id: String,
    pub file_name: String,
    pub left: BuildKey,
    pub right: BuildKey,
    pub status: ComparisonStatus,
    #[serde(default)]
    pub inserted: Vec<String>,
    #[serde(default)]
    pub deleted: Vec<String>,
    #[serde(default)]
    pub changed: Vec<ChangedRow>,
    #[serde(default)]
    pub message: Option<String>,
    pub requested_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl FileDiffReport {
    pub fn queued(compare_id: &str, file_name: &str, left: &BuildKey, right: &BuildKey) -> Self {
        Self {
            compare_id: compare_id.to_string(),
            file_name: file_name.to_string(),
            left: left.clone(),
            right: right.clone(),
            status: ComparisonStatus::Queued,
            inserted: Vec::new(),
            deleted: Vec::new(),
            changed: Vec::new(),
            message: None,
            requested_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_identical(&self) -> bool {
        self.inserted.is_empty() && self.deleted.is_empty() && self.changed.is_empty()
    }
}
