//! Sequential execution of the configured jobs.
//!
//! Jobs run in declaration order and the first error aborts the run: later
//! jobs are not attempted.

use std::fmt;

use bucket_backup_config::Job;
use bucket_backup_sync::{SyncEngine, SyncError};
use bucket_backup_sync_models::SyncStats;
use bucket_backup_sync_models::progress::ProgressCallback;

/// Totals across every job of a run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Merged statistics of all tree jobs.
    pub trees: SyncStats,
    /// Snapshot jobs completed.
    pub snapshots: u64,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}; {} snapshot(s)", self.trees, self.snapshots)
    }
}

/// Runs `jobs` in order against `engine`, then finishes `progress` with the
/// run total or the failure.
///
/// # Errors
///
/// Returns the first job error.
pub async fn run_jobs(
    engine: &SyncEngine<'_>,
    jobs: &[Job],
    progress: &dyn ProgressCallback,
) -> Result<RunSummary, SyncError> {
    let result = run_in_order(engine, jobs).await;

    match &result {
        Ok(summary) => progress.finish(summary.to_string()),
        Err(e) => progress.finish(format!("Failed: {e}")),
    }

    result
}

async fn run_in_order(engine: &SyncEngine<'_>, jobs: &[Job]) -> Result<RunSummary, SyncError> {
    let mut summary = RunSummary::default();

    for (i, job) in jobs.iter().enumerate() {
        let n = i + 1;
        match job {
            Job::Tree(target) => {
                let report = engine.backup_tree(target).await?;
                log::info!("[{n}/{}] {}: {}", jobs.len(), report.prefix, report.stats);
                summary.trees.merge(report.stats);
            }
            Job::Snapshot(target) => {
                let report = engine.backup_snapshot(target).await?;
                log::info!(
                    "[{n}/{}] snapshot {} -> {}{}",
                    jobs.len(),
                    report.selected.display(),
                    report.key,
                    if report.transferred { "" } else { " (not uploaded)" }
                );
                summary.snapshots += 1;
            }
        }
    }

    Ok(summary)
}
