use std::time::Duration;

use buildplane_catalog::BuildCatalog;
use buildplane_compare::ComparisonEngine;
use buildplane_core::{BuildKey, BuildplaneConfig};

/// How often the CLI re-reads a report while the engine works.
const REPORT_POLL: Duration = Duration::from_secs(2);

fn default_id(left: &BuildKey, right: &BuildKey) -> String {
    let strip = |id: &str| id.replace([':', '-'], "");
    format!("{}_{}", strip(&left.build_id), strip(&right.build_id))
}

/// Queue a build comparison and wait for its report.
pub async fn builds(
    catalog: BuildCatalog,
    config: &BuildplaneConfig,
    compare_id: Option<String>,
    left: &BuildKey,
    right: &BuildKey,
) -> anyhow::Result<()> {
    let compare_id = compare_id.unwrap_or_else(|| default_id(left, right));
    let engine = ComparisonEngine::start(catalog, &config.compare)?;
    engine.compare_builds(&compare_id, left, right)?;

    let report = loop {
        match engine.build_report(&compare_id)? {
            Some(report) if !report.status.is_pending() => break report,
            _ => tokio::time::sleep(REPORT_POLL).await,
        }
    };
    engine.shutdown().await;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Queue a single-file diff and wait for its report.
pub async fn file(
    catalog: BuildCatalog,
    config: &BuildplaneConfig,
    compare_id: Option<String>,
    left: &BuildKey,
    right: &BuildKey,
    file_name: &str,
) -> anyhow::Result<()> {
    let compare_id = compare_id.unwrap_or_else(|| default_id(left, right));
    let engine = ComparisonEngine::start(catalog, &config.compare)?;
    engine.compare_file(&compare_id, left, right, file_name)?;

    let report = loop {
        match engine.file_report(&compare_id, file_name)? {
            Some(report) if !report.status.is_pending() => break report,
            _ => tokio::time::sleep(REPORT_POLL).await,
        }
    };
    engine.shutdown().await;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
