//! The ordered battery run once both builds have finished.

use std::collections::BTreeMap;
use std::io::Read;

use sha2::{Digest, Sha256};

use buildplane_catalog::{ArtifactKind, Build, BuildCatalog};
use buildplane_core::ConditionPhase;

use crate::error::CompareResult;
use crate::report::ComparatorResult;

/// One check over a pair of finished builds.
pub trait BuildComparator: Send + Sync {
    fn name(&self) -> &'static str;

    fn compare(
        &self,
        catalog: &BuildCatalog,
        left: &Build,
        right: &Build,
    ) -> CompareResult<ComparatorResult>;
}

/// Status, pre-conditions, post-conditions, validation report, archive content.
pub fn standard_battery() -> Vec<Box<dyn BuildComparator>> {
    vec![
        Box::new(StatusComparator),
        Box::new(ConditionReportComparator(ConditionPhase::Pre)),
        Box::new(ConditionReportComparator(ConditionPhase::Post)),
        Box::new(ValidationReportComparator),
        Box::new(ArchiveContentComparator),
    ]
}

pub struct StatusComparator;

impl BuildComparator for StatusComparator {
    fn name(&self) -> &'static str {
        "status"
    }

    fn compare(
        &self,
        _catalog: &BuildCatalog,
        left: &Build,
        right: &Build,
    ) -> CompareResult<ComparatorResult> {
        if left.status == right.status {
            Ok(ComparatorResult::pass(self.name()))
        } else {
            Ok(ComparatorResult::fail(
                self.name(),
                format!("{} != {}", left.status, right.status),
            ))
        }
    }
}

pub struct ConditionReportComparator(pub ConditionPhase);

impl BuildComparator for ConditionReportComparator {
    fn name(&self) -> &'static str {
        match self.0 {
            ConditionPhase::Pre => "pre-condition-report",
            ConditionPhase::Post => "post-condition-report",
        }
    }

    fn compare(
        &self,
        catalog: &BuildCatalog,
        left: &Build,
        right: &Build,
    ) -> CompareResult<ComparatorResult> {
        let l = catalog.load_condition_report(&left.key, self.0)?;
        let r = catalog.load_condition_report(&right.key, self.0)?;
        if l == r {
            return Ok(ComparatorResult::pass(self.name()));
        }
        let count = |findings: &Option<Vec<_>>| findings.as_ref().map_or(0, Vec::len);
        Ok(ComparatorResult::fail(
            self.name(),
            format!("findings differ ({} vs {})", count(&l), count(&r)),
        ))
    }
}

pub struct ValidationReportComparator;

impl BuildComparator for ValidationReportComparator {
    fn name(&self) -> &'static str {
        "validation-report"
    }

    fn compare(
        &self,
        catalog: &BuildCatalog,
        left: &Build,
        right: &Build,
    ) -> CompareResult<ComparatorResult> {
        let l = catalog.load_validation_report(&left.key)?;
        let r = catalog.load_validation_report(&right.key)?;
        match (l, r) {
            (l, r) if l == r => Ok(ComparatorResult::pass(self.name())),
            (Some(_), None) | (None, Some(_)) => Ok(ComparatorResult::fail(
                self.name(),
                "validation report present on one side only",
            )),
            _ => Ok(ComparatorResult::fail(self.name(), "validation reports differ")),
        }
    }
}

/// Compares the per-entry SHA-256 digests of the two release archives.
pub struct ArchiveContentComparator;

impl ArchiveContentComparator {
    fn digests(catalog: &BuildCatalog, build: &Build) -> CompareResult<Option<BTreeMap<String, String>>> {
        let archive = catalog
            .list_files(&build.key, ArtifactKind::OutputFiles)?
            .into_iter()
            .find(|name| name.ends_with(".tar"));
        let Some(name) = archive else {
            return Ok(None);
        };
        let Some(data) = catalog.get_file(&build.key, ArtifactKind::OutputFiles, &name)? else {
            return Ok(None);
        };

        let mut digests = BTreeMap::new();
        let mut archive = tar::Archive::new(data.as_slice());
        for entry in archive.entries()? {
            let mut entry = entry?;
            let path = entry.path()?.to_string_lossy().into_owned();
            let mut content = Vec::new();
            entry.read_to_end(&mut content)?;
            digests.insert(path, hex::encode(Sha256::digest(&content)));
        }
        Ok(Some(digests))
    }
}

impl BuildComparator for ArchiveContentComparator {
    fn name(&self) -> &'static str {
        "archive-content"
    }

    fn compare(
        &self,
        catalog: &BuildCatalog,
        left: &Build,
        right: &Build,
    ) -> CompareResult<ComparatorResult> {
        let (l, r) = match (Self::digests(catalog, left)?, Self::digests(catalog, right)?) {
            (None, None) => return Ok(ComparatorResult::pass(self.name())),
            (Some(_), None) | (None, Some(_)) => {
                return Ok(ComparatorResult::fail(
                    self.name(),
                    "release archive present on one side only",
                ));
            }
            (Some(l), Some(r)) => (l, r),
        };

        let mut differing: Vec<&str> = l
            .iter()
            .filter(|(name, digest)| r.get(*name) != Some(*digest))
            .map(|(name, _)| name.as_str())
            .collect();
        differing.extend(r.keys().filter(|name| !l.contains_key(*name)).map(String::as_str));

        if differing.is_empty() {
            Ok(ComparatorResult::pass(self.name()))
        } else {
            differing.sort_unstable();
            Ok(ComparatorResult::fail(
                self.name(),
                format!("entries differ: {}", differing.join(", ")),
            ))
        }
    }
}
