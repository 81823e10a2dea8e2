//! Run history management
//!
//! This module decides, at process start, which run an invocation works on,
//! publishes the newest healthy run's output, and rotates old run artifacts.
//!
//! # Selection
//!
//! | Newest snapshot | Decision |
//! |-----------------|----------|
//! | none, unreadable or corrupt | start a fresh cycle |
//! | incomplete | resume it |
//! | complete, failure ratio above threshold | resume it |
//! | complete and healthy, younger than `min-interval-days` | nothing to do |
//! | complete and healthy, older | start a fresh cycle |

use crate::config::HarvestConfig;
use crate::output::{evaluate, OutcomeSummary};
use crate::state::RetryPolicy;
use crate::storage::{write_atomic, EntityStore, RunId, SnapshotLayout, StorageError, StorageResult};
use chrono::{DateTime, Utc};
use std::io;
use std::path::Path;

/// What an invocation should work on
#[derive(Debug)]
pub enum Selection {
    /// Fetch a new listing and start a new run
    Fresh,

    /// Continue an existing run with its accumulated state
    Resume { run: RunId, store: EntityStore },

    /// The newest run is healthy and recent; no fetching this invocation
    UpToDate {
        run: RunId,
        summary: OutcomeSummary,
        age_days: i64,
    },
}

/// Picks the run to work on
///
/// # Arguments
///
/// * `layout` - Where run snapshots live
/// * `settings` - Retry, threshold and staleness policy
/// * `now` - Current wall-clock time
/// * `force_fresh` - Skip inspection and always start a fresh cycle
pub fn select_run(
    layout: &SnapshotLayout,
    settings: &HarvestConfig,
    now: DateTime<Utc>,
    force_fresh: bool,
) -> StorageResult<Selection> {
    if force_fresh {
        tracing::info!("Fresh cycle requested, ignoring previous runs");
        return Ok(Selection::Fresh);
    }

    let newest = match layout.list_runs()?.first() {
        Some(run) => *run,
        None => {
            tracing::info!("No previous runs found, starting a fresh cycle");
            return Ok(Selection::Fresh);
        }
    };

    let store = match EntityStore::load(&layout.state_path(newest)) {
        Ok(store) => store,
        Err(e @ (StorageError::NotFound(_) | StorageError::Corrupt { .. })) => {
            tracing::warn!("Run {} is not usable ({}), starting a fresh cycle", newest, e);
            return Ok(Selection::Fresh);
        }
        Err(e) => return Err(e),
    };

    let policy = RetryPolicy::new(settings.max_retries);
    let summary = evaluate(&store, &policy, settings.failure_threshold_percent);

    if !summary.complete {
        tracing::info!(
            "Resuming incomplete run {} ({} of {} entities remaining)",
            newest,
            summary.remaining(),
            summary.total
        );
        return Ok(Selection::Resume { run: newest, store });
    }

    if !summary.outcome.is_success() {
        tracing::info!(
            "Resuming run {}: complete but {:.2}% permanently failed",
            newest,
            summary.permanent_failure_ratio * 100.0
        );
        return Ok(Selection::Resume { run: newest, store });
    }

    let age_days = newest.days_since(now);
    if age_days < settings.min_interval_days {
        tracing::info!(
            "Run {} is healthy and {} day(s) old (minimum interval {}), nothing to do",
            newest,
            age_days,
            settings.min_interval_days
        );
        return Ok(Selection::UpToDate {
            run: newest,
            summary,
            age_days,
        });
    }

    tracing::info!(
        "Run {} is healthy and {} day(s) old, starting a fresh cycle",
        newest,
        age_days
    );
    Ok(Selection::Fresh)
}

/// Copies the output of the newest healthy run to the published alias
///
/// Runs are scanned newest-first; unreadable runs are skipped.
///
/// # Returns
///
/// * `Ok(Some(run))` - The run whose output was published
/// * `Ok(None)` - No healthy run exists; the alias is left untouched
pub fn publish_latest(
    layout: &SnapshotLayout,
    policy: &RetryPolicy,
    threshold_percent: f64,
) -> StorageResult<Option<RunId>> {
    for run in layout.list_runs()? {
        let store = match EntityStore::load(&layout.state_path(run)) {
            Ok(store) => store,
            Err(e) => {
                tracing::debug!("Skipping run {} for publication: {}", run, e);
                continue;
            }
        };

        if !evaluate(&store, policy, threshold_percent).is_healthy() {
            continue;
        }

        let output = match std::fs::read(layout.output_path(run)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!("Healthy run {} has no output artifact, skipping", run);
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        write_atomic(layout.latest_path(), &output)?;
        tracing::info!(
            "Published run {} to {}",
            run,
            layout.latest_path().display()
        );
        return Ok(Some(run));
    }

    tracing::info!("No healthy run to publish yet");
    Ok(None)
}

/// Deletes the artifacts of every run beyond the newest `max_history`
///
/// Deletion is best-effort per artifact: a missing file is ignored and other
/// failures are logged without stopping the rotation.
///
/// # Returns
///
/// The runs that were rotated out, newest first
pub fn rotate(layout: &SnapshotLayout, max_history: usize) -> StorageResult<Vec<RunId>> {
    let runs = layout.list_runs()?;
    let expired: Vec<RunId> = runs.into_iter().skip(max_history).collect();

    for run in &expired {
        remove_artifact(&layout.state_path(*run));
        remove_artifact(&layout.output_path(*run));
    }

    if !expired.is_empty() {
        tracing::info!(
            "Rotated out {} run(s), keeping the newest {}",
            expired.len(),
            max_history
        );
    }

    Ok(expired)
}

fn remove_artifact(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!("Removed {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove {}: {}", path.display(), e),
    }
}
