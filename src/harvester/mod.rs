//! Harvester module for bounded, resumable collection runs
//!
//! This module contains the core harvesting logic, including:
//! - Remote catalog access (listing and per-entity detail)
//! - Per-invocation request and wall-time budgets
//! - Periodic checkpoints of the run's artifacts
//! - Overall invocation coordination

mod budget;
mod checkpoint;
mod coordinator;
mod source;

pub use budget::RunBudget;
pub use checkpoint::{render_output, write_checkpoint};
pub use coordinator::{Harvester, RunAction, RunReport, StopReason};
pub use source::{build_http_client, EntitySource, HttpSource, SourceError};

use crate::config::{Config, HarvestConfig};
use crate::state::RetryPolicy;
use crate::storage::SnapshotLayout;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Source of wall-clock time for run ids, attempt timestamps and staleness
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at one instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Everything an invocation needs besides its collaborators
#[derive(Clone)]
pub struct RunContext {
    pub settings: HarvestConfig,
    pub layout: SnapshotLayout,
    pub clock: Arc<dyn Clock>,
}

impl RunContext {
    pub fn new(settings: HarvestConfig, layout: SnapshotLayout) -> Self {
        Self {
            settings,
            layout,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.harvest.clone(),
            SnapshotLayout::from_config(&config.output),
        )
    }

    /// Replaces the system clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.settings.max_retries)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
