//! Outcome evaluation for a run's entity store
//!
//! The outcome is a pure function of the store, the retry policy and the
//! failure threshold. It is recomputed whenever it is needed.

use crate::state::{FetchStatus, RetryPolicy};
use crate::storage::EntityStore;

/// Process-level result of an invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Permanent failures within threshold, whether or not the run is complete
    Success,

    /// Permanent-failure ratio above threshold
    Failure,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Process exit code for this outcome
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
        }
    }
}

/// Aggregate state of a run
#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeSummary {
    pub total: usize,
    pub succeeded: usize,
    pub pending: usize,
    /// Failed entities that still have attempts left
    pub retryable: usize,
    pub permanently_failed: usize,
    /// `permanently_failed / total`, 0 for an empty store
    pub permanent_failure_ratio: f64,
    pub complete: bool,
    pub outcome: RunOutcome,
}

impl OutcomeSummary {
    /// Complete and within the failure threshold
    pub fn is_healthy(&self) -> bool {
        self.complete && self.outcome.is_success()
    }

    /// Entities still waiting for an attempt in a later invocation
    pub fn remaining(&self) -> usize {
        self.pending + self.retryable
    }
}

/// Computes the outcome summary of a store
///
/// # Arguments
///
/// * `store` - The entities of the run
/// * `policy` - Retry budget deciding which failures are permanent
/// * `threshold_percent` - Highest tolerated permanent-failure ratio, in percent
pub fn evaluate(store: &EntityStore, policy: &RetryPolicy, threshold_percent: f64) -> OutcomeSummary {
    let mut succeeded = 0;
    let mut pending = 0;
    let mut retryable = 0;
    let mut permanently_failed = 0;

    for entity in store.iter() {
        match entity.fetch_status {
            FetchStatus::Succeeded => succeeded += 1,
            FetchStatus::Pending => pending += 1,
            FetchStatus::Failed if policy.is_permanently_failed(entity) => permanently_failed += 1,
            FetchStatus::Failed => retryable += 1,
        }
    }

    let total = store.len();
    let permanent_failure_ratio = if total == 0 {
        0.0
    } else {
        permanently_failed as f64 / total as f64
    };

    let outcome = if exceeds_threshold(permanently_failed, total, threshold_percent) {
        RunOutcome::Failure
    } else {
        RunOutcome::Success
    };

    OutcomeSummary {
        total,
        succeeded,
        pending,
        retryable,
        permanently_failed,
        permanent_failure_ratio,
        complete: policy.is_run_complete(store.iter()),
        outcome,
    }
}

/// True if `permanently_failed / total` is strictly above `threshold_percent`
///
/// Compared as `failed * 100 > threshold * total` so that exact boundary
/// ratios are not affected by rounding.
pub fn exceeds_threshold(permanently_failed: usize, total: usize, threshold_percent: f64) -> bool {
    if total == 0 {
        return false;
    }
    (permanently_failed as f64) * 100.0 > threshold_percent * total as f64
}
