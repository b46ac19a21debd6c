//! buildplane-compare: background comparison of builds and release files.
//!
//! A build comparison waits until both builds have finished, then runs an
//! ordered battery of comparators and records a single PASS/FAIL verdict.
//! A file comparison diffs one output file of two builds row by row. Both
//! report kinds live in the catalog under `comparisons/`.

pub mod comparators;
pub mod engine;
pub mod error;
pub mod file_diff;
pub mod report;

pub use comparators::{BuildComparator, standard_battery};
pub use engine::ComparisonEngine;
pub use error::{CompareError, CompareResult};
pub use file_diff::{LineDiff, diff_lines};
pub use report::{
    BuildComparisonReport, ChangedRow, ComparatorResult, ComparisonStatus, FileDiffReport, Verdict,
};
