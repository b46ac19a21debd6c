//! ComparisonEngine: two single-worker background queues.
//!
//! Build comparisons and file comparisons each have their own unbounded FIFO
//! drained by one task, so jobs are serialized within a queue and independent
//! across queues. Jobs carry only ids: the worker reloads the persisted report,
//! which lets a restarted engine pick up QUEUED and RUNNING reports left behind.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use buildplane_catalog::{ArtifactKind, Build, BuildCatalog, CatalogError, CatalogResult, paths};
use buildplane_core::BuildKey;
use buildplane_core::config::CompareConfig;

use crate::comparators::{BuildComparator, standard_battery};
use crate::error::{CompareError, CompareResult};
use crate::file_diff::diff_lines;
use crate::report::{BuildComparisonReport, ComparisonStatus, FileDiffReport};

struct BuildJob {
    compare_id: String,
}

struct FileJob {
    compare_id: String,
    file_name: String,
}

/// Handle to the running comparison workers.
pub struct ComparisonEngine {
    catalog: BuildCatalog,
    build_tx: mpsc::UnboundedSender<BuildJob>,
    file_tx: mpsc::UnboundedSender<FileJob>,
    shutdown_tx: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl ComparisonEngine {
    /// Spawn both workers and re-queue unfinished reports found in the catalog.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(catalog: BuildCatalog, config: &CompareConfig) -> CompareResult<Self> {
        Self::start_with(catalog, config, standard_battery())
    }

    /// Like [`start`](Self::start) with a custom comparator battery.
    pub fn start_with(
        catalog: BuildCatalog,
        config: &CompareConfig,
        battery: Vec<Box<dyn BuildComparator>>,
    ) -> CompareResult<Self> {
        let (build_tx, build_rx) = mpsc::unbounded_channel();
        let (file_tx, file_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let resumed = resume_pending(&catalog, &build_tx, &file_tx)?;
        if resumed > 0 {
            info!(count = resumed, "re-queued unfinished comparisons");
        }

        let build_worker = BuildWorker {
            catalog: catalog.clone(),
            battery,
            poll_interval: config.poll_interval(),
            max_wait: config.max_wait(),
        };
        let file_worker = FileWorker {
            catalog: catalog.clone(),
        };

        let workers = vec![
            tokio::spawn(build_worker.run(build_rx, shutdown_rx.clone())),
            tokio::spawn(file_worker.run(file_rx, shutdown_rx)),
        ];

        Ok(Self {
            catalog,
            build_tx,
            file_tx,
            shutdown_tx,
            workers,
        })
    }

    /// Queue a whole-build comparison.
    ///
    /// A report that is already queued, running or completed is returned
    /// as-is instead of being queued again.
    pub fn compare_builds(
        &self,
        compare_id: &str,
        left: &BuildKey,
        right: &BuildKey,
    ) -> CompareResult<BuildComparisonReport> {
        self.catalog.require(left)?;
        self.catalog.require(right)?;

        if let Some(existing) = self.build_report(compare_id)? {
            if existing.status.blocks_requeue() {
                debug!(%compare_id, status = ?existing.status, "comparison already known");
                return Ok(existing);
            }
        }

        let report = BuildComparisonReport::queued(compare_id, left, right);
        self.catalog.save_comparison(compare_id, &report)?;
        self.build_tx
            .send(BuildJob {
                compare_id: compare_id.to_string(),
            })
            .map_err(|_| CompareError::Closed)?;
        info!(%compare_id, %left, %right, "build comparison queued");
        Ok(report)
    }

    /// Queue a diff of one output file present in both builds.
    pub fn compare_file(
        &self,
        compare_id: &str,
        left: &BuildKey,
        right: &BuildKey,
        file_name: &str,
    ) -> CompareResult<FileDiffReport> {
        self.catalog.require(left)?;
        self.catalog.require(right)?;

        if let Some(existing) = self.file_report(compare_id, file_name)? {
            if existing.status.blocks_requeue() {
                debug!(%compare_id, %file_name, status = ?existing.status, "file diff already known");
                return Ok(existing);
            }
        }

        let report = FileDiffReport::queued(compare_id, file_name, left, right);
        self.catalog.save_file_diff(compare_id, file_name, &report)?;
        self.file_tx
            .send(FileJob {
                compare_id: compare_id.to_string(),
                file_name: file_name.to_string(),
            })
            .map_err(|_| CompareError::Closed)?;
        info!(%compare_id, %file_name, "file diff queued");
        Ok(report)
    }

    pub fn build_report(&self, compare_id: &str) -> CompareResult<Option<BuildComparisonReport>> {
        Ok(self.catalog.load_comparison(compare_id)?)
    }

    pub fn file_report(
        &self,
        compare_id: &str,
        file_name: &str,
    ) -> CompareResult<Option<FileDiffReport>> {
        Ok(self.catalog.load_file_diff(compare_id, file_name)?)
    }

    /// Signal both workers and wait for them to exit.
    ///
    /// A job interrupted mid-wait keeps its RUNNING report and is resumed by
    /// the next engine started over the same catalog.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.workers {
            if let Err(e) = handle.await {
                error!(error = %e, "comparison worker panicked");
            }
        }
        info!("comparison engine stopped");
    }
}

enum ReportKey<'a> {
    Build(&'a str),
    File(&'a str, &'a str),
}

/// `comparisons/{id}.json` or `comparisons/{id}/files/{name}.json`.
fn parse_report_key<'a>(prefix: &str, key: &'a str) -> Option<ReportKey<'a>> {
    let rest = key.strip_prefix(prefix)?.strip_suffix(".json")?;
    match rest.split_once("/files/") {
        Some((id, file)) if !id.is_empty() && !file.is_empty() => Some(ReportKey::File(id, file)),
        Some(_) => None,
        None if !rest.is_empty() && !rest.contains('/') => Some(ReportKey::Build(rest)),
        None => None,
    }
}

fn resume_pending(
    catalog: &BuildCatalog,
    build_tx: &mpsc::UnboundedSender<BuildJob>,
    file_tx: &mpsc::UnboundedSender<FileJob>,
) -> CompareResult<usize> {
    let prefix = paths::comparisons_prefix();
    let mut resumed = 0;
    for key in catalog.comparison_keys()? {
        match parse_report_key(&prefix, &key) {
            Some(ReportKey::Build(id)) => {
                let pending = catalog
                    .load_comparison::<BuildComparisonReport>(id)?
                    .is_some_and(|r| r.status.is_pending());
                if pending {
                    let _ = build_tx.send(BuildJob {
                        compare_id: id.to_string(),
                    });
                    resumed += 1;
                }
            }
            Some(ReportKey::File(id, file_name)) => {
                let pending = catalog
                    .load_file_diff::<FileDiffReport>(id, file_name)?
                    .is_some_and(|r| r.status.is_pending());
                if pending {
                    let _ = file_tx.send(FileJob {
                        compare_id: id.to_string(),
                        file_name: file_name.to_string(),
                    });
                    resumed += 1;
                }
            }
            None => warn!(%key, "unrecognised object under comparisons/"),
        }
    }
    Ok(resumed)
}

// ── Build worker ───────────────────────────────────────────────────

struct BuildWorker {
    catalog: BuildCatalog,
    battery: Vec<Box<dyn BuildComparator>>,
    poll_interval: Duration,
    max_wait: Duration,
}

/// How a wait for both builds ended.
enum Wait {
    Finished(Build, Build),
    TimedOut,
    Shutdown,
}

impl BuildWorker {
    async fn run(
        self,
        mut jobs: mpsc::UnboundedReceiver<BuildJob>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        debug!("build comparison worker starting");
        loop {
            tokio::select! {
                job = jobs.recv() => {
                    let Some(job) = job else { break };
                    match self.process(&job.compare_id, &mut shutdown).await {
                        Ok(true) => {}
                        Ok(false) => break,
                        Err(e) => error!(compare_id = %job.compare_id, error = %e, "build comparison failed"),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!("build comparison worker shutting down");
    }

    /// Returns `false` when shutdown interrupted the job.
    async fn process(
        &self,
        compare_id: &str,
        shutdown: &mut watch::Receiver<bool>,
    ) -> CompareResult<bool> {
        let Some(mut report) = self
            .catalog
            .load_comparison::<BuildComparisonReport>(compare_id)?
        else {
            warn!(%compare_id, "queued comparison has no report");
            return Ok(true);
        };

        report.status = ComparisonStatus::Running;
        self.catalog.save_comparison(compare_id, &report)?;
        debug!(%compare_id, "comparison running");

        let wait = match self.wait_for_builds(&report.left, &report.right, shutdown).await {
            Ok(wait) => wait,
            Err(e) => {
                report.fail(e.to_string());
                self.catalog.save_comparison(compare_id, &report)?;
                return Err(e);
            }
        };

        match wait {
            Wait::Shutdown => return Ok(false),
            Wait::TimedOut => {
                report.fail(format!(
                    "timed out after {} minutes waiting for both builds to finish",
                    self.max_wait.as_secs() / 60
                ));
                warn!(%compare_id, "comparison timed out");
            }
            Wait::Finished(left, right) => match self.run_battery(&left, &right) {
                Ok(results) => {
                    report.complete(results);
                    info!(%compare_id, verdict = ?report.verdict, "comparison completed");
                }
                Err(e) => {
                    report.fail(e.to_string());
                    warn!(%compare_id, error = %e, "comparator failed");
                }
            },
        }
        self.catalog.save_comparison(compare_id, &report)?;
        Ok(true)
    }

    async fn wait_for_builds(
        &self,
        left: &BuildKey,
        right: &BuildKey,
        shutdown: &mut watch::Receiver<bool>,
    ) -> CompareResult<Wait> {
        let deadline = Instant::now().checked_add(self.max_wait);
        loop {
            match self.poll_builds(left, right) {
                Ok((l, r)) if l.status.is_finished() && r.status.is_finished() => {
                    return Ok(Wait::Finished(l, r));
                }
                Ok((l, r)) => {
                    debug!(left = %l.status, right = %r.status, "waiting for builds to finish");
                }
                Err(e @ CatalogError::NotFound(_)) => return Err(e.into()),
                Err(e) => warn!(%left, %right, error = %e, "build status unavailable, polling again"),
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Ok(Wait::TimedOut);
            }
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.changed() => return Ok(Wait::Shutdown),
            }
        }
    }

    fn poll_builds(&self, left: &BuildKey, right: &BuildKey) -> CatalogResult<(Build, Build)> {
        Ok((self.catalog.require(left)?, self.catalog.require(right)?))
    }

    fn run_battery(
        &self,
        left: &Build,
        right: &Build,
    ) -> CompareResult<Vec<crate::report::ComparatorResult>> {
        self.battery
            .iter()
            .map(|comparator| comparator.compare(&self.catalog, left, right))
            .collect()
    }
}

// ── File worker ────────────────────────────────────────────────────

#[derive(Clone)]
struct FileWorker {
    catalog: BuildCatalog,
}

impl FileWorker {
    async fn run(
        self,
        mut jobs: mpsc::UnboundedReceiver<FileJob>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        debug!("file diff worker starting");
        loop {
            tokio::select! {
                job = jobs.recv() => {
                    let Some(job) = job else { break };
                    let worker = self.clone();
                    let outcome = tokio::task::spawn_blocking(move || {
                        let result = worker.process(&job.compare_id, &job.file_name);
                        (job, result)
                    })
                    .await;
                    match outcome {
                        Ok((_, Ok(()))) => {}
                        Ok((job, Err(e))) => {
                            error!(compare_id = %job.compare_id, file_name = %job.file_name, error = %e, "file diff failed");
                        }
                        Err(e) => error!(error = %e, "file diff task panicked"),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!("file diff worker shutting down");
    }

    fn process(&self, compare_id: &str, file_name: &str) -> CompareResult<()> {
        let Some(mut report) = self
            .catalog
            .load_file_diff::<FileDiffReport>(compare_id, file_name)?
        else {
            warn!(%compare_id, %file_name, "queued file diff has no report");
            return Ok(());
        };

        report.status = ComparisonStatus::Running;
        self.catalog.save_file_diff(compare_id, file_name, &report)?;

        let left = self
            .catalog
            .get_file(&report.left, ArtifactKind::OutputFiles, file_name)?;
        let right = self
            .catalog
            .get_file(&report.right, ArtifactKind::OutputFiles, file_name)?;

        if left.is_none() && right.is_none() {
            report.status = ComparisonStatus::FailedToCompare;
            report.message = Some(format!("{file_name} not found in either build"));
        } else {
            let text = |data: Option<Vec<u8>>| {
                data.map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                    .unwrap_or_default()
            };
            let diff = diff_lines(&text(left), &text(right));
            report.inserted = diff.inserted;
            report.deleted = diff.deleted;
            report.changed = diff.changed;
            report.status = ComparisonStatus::Completed;
            info!(
                %compare_id,
                %file_name,
                inserted = report.inserted.len(),
                deleted = report.deleted.len(),
                changed = report.changed.len(),
                "file diff completed"
            );
        }
        report.completed_at = Some(chrono::Utc::now());
        self.catalog.save_file_diff(compare_id, file_name, &report)?;
        Ok(())
    }
}
