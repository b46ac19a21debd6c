//! Key naming scheme.
//!
//! Pure functions from (center, product, build, artifact kind) to object
//! keys. Nothing outside this crate builds or parses keys by hand.
//!
//! ```text
//! {center}/{product}/{buildId}/status:BUILDING
//! {center}/{product}/{buildId}/config.json
//! {center}/{product}/{buildId}/input-files/{file}
//! comparisons/{compareId}.json
//! comparisons/{compareId}/files/{file}.json
//! ```

use buildplane_core::BuildKey;

pub const CONFIG: &str = "config.json";
pub const QA_CONFIG: &str = "qa-config.json";
pub const REPORT: &str = "report.json";
pub const PRE_CONDITION_REPORT: &str = "pre-condition-checks-report.json";
pub const POST_CONDITION_REPORT: &str = "post-condition-checks-report.json";
pub const INPUT_GATHER_REPORT: &str = "input-gather-report.json";
pub const INPUT_PREPARE_REPORT: &str = "input-prepare-report.json";
pub const VALIDATION_URL: &str = "rvf-url.txt";
pub const VALIDATION_REPORT: &str = "rvf-report.json";

const COMPARISONS: &str = "comparisons";

/// Reports written upstream by the input gathering subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputReportKind {
    Gather,
    Prepare,
}

impl InputReportKind {
    pub fn object_name(&self) -> &'static str {
        match self {
            InputReportKind::Gather => INPUT_GATHER_REPORT,
            InputReportKind::Prepare => INPUT_PREPARE_REPORT,
        }
    }
}

/// Directory-like groups of files stored under a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Manifest,
    InputFiles,
    TransformedFiles,
    Classification,
    OutputFiles,
    Logs,
}

impl ArtifactKind {
    pub fn segment(&self) -> &'static str {
        match self {
            ArtifactKind::Manifest => "manifest",
            ArtifactKind::InputFiles => "input-files",
            ArtifactKind::TransformedFiles => "transformed-files",
            ArtifactKind::Classification => "classification",
            ArtifactKind::OutputFiles => "output-files",
            ArtifactKind::Logs => "logs",
        }
    }
}

/// `{center}/{product}/`
pub fn product_prefix(center: &str, product: &str) -> String {
    format!("{center}/{product}/")
}

/// `{center}/{product}/{buildId}/`
pub fn build_prefix(key: &BuildKey) -> String {
    format!("{}/{}/{}/", key.center, key.product, key.build_id)
}

/// A named object directly under the build prefix.
pub fn object_key(key: &BuildKey, name: &str) -> String {
    format!("{}{name}", build_prefix(key))
}

pub fn artifact_prefix(key: &BuildKey, kind: ArtifactKind) -> String {
    format!("{}{}/", build_prefix(key), kind.segment())
}

pub fn artifact_key(key: &BuildKey, kind: ArtifactKind, file_name: &str) -> String {
    format!("{}{file_name}", artifact_prefix(key, kind))
}

/// Split a key listed under `product_prefix` into `(build_id, segment)`.
///
/// Only keys exactly one level below a build qualify; nested artifact keys
/// return `None`.
pub fn split_build_key<'a>(product_prefix: &str, key: &'a str) -> Option<(&'a str, &'a str)> {
    let rest = key.strip_prefix(product_prefix)?;
    let (build_id, segment) = rest.split_once('/')?;
    if build_id.is_empty() || segment.is_empty() || segment.contains('/') {
        return None;
    }
    Some((build_id, segment))
}

/// Last path segment of a key.
pub fn file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Prefix holding every comparison report.
pub fn comparisons_prefix() -> String {
    format!("{COMPARISONS}/")
}

pub fn comparison_key(compare_id: &str) -> String {
    format!("{COMPARISONS}/{compare_id}.json")
}

pub fn file_diff_key(compare_id: &str, file_name: &str) -> String {
    format!("{COMPARISONS}/{compare_id}/files/{file_name}.json")
}
