//! Harvest coordinator - one bounded invocation
//!
//! This module contains the work loop that ties everything together:
//! - Selecting the run to work on (fresh, resumed, or nothing to do)
//! - Fetching entity details within the request and time budgets
//! - Checkpointing progress every few entities and at loop exit
//! - Evaluating the outcome, publishing, and rotating history

use crate::harvester::budget::RunBudget;
use crate::harvester::checkpoint::write_checkpoint;
use crate::harvester::source::EntitySource;
use crate::harvester::RunContext;
use crate::history::{self, Selection};
use crate::output::{evaluate, FieldNormalizer, Normalizer, OutcomeSummary, RunOutcome};
use crate::state::AttemptOutcome;
use crate::storage::{EntityStore, RunId};
use crate::HarvestError;

/// How the invocation obtained its run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunAction {
    /// A new listing was fetched and a new run created
    Started,

    /// An existing run was continued
    Resumed,

    /// The newest run is healthy and recent; nothing was fetched
    UpToDate,
}

/// Why the work loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Every eligible entity received an attempt
    QueueExhausted,

    /// More entities were eligible than the request budget allowed
    RequestBudget,

    /// The wall-time budget ran out
    TimeBudget,

    /// No work loop was run
    Skipped,
}

/// Result of one invocation
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run: RunId,
    pub action: RunAction,
    pub attempted: usize,
    pub stop: StopReason,
    pub summary: OutcomeSummary,
    pub published: Option<RunId>,
    pub rotated: Vec<RunId>,
}

impl RunReport {
    pub fn outcome(&self) -> RunOutcome {
        self.summary.outcome
    }

    pub fn exit_code(&self) -> u8 {
        self.outcome().exit_code()
    }
}

/// Main harvest coordinator
pub struct Harvester<S, N = FieldNormalizer> {
    ctx: RunContext,
    source: S,
    normalizer: N,
    force_fresh: bool,
}

impl<S: EntitySource> Harvester<S, FieldNormalizer> {
    /// Creates a harvester using the default field normalizer
    pub fn with_default_normalizer(ctx: RunContext, source: S) -> Self {
        Self::new(ctx, source, FieldNormalizer)
    }
}

impl<S: EntitySource, N: Normalizer> Harvester<S, N> {
    pub fn new(ctx: RunContext, source: S, normalizer: N) -> Self {
        Self {
            ctx,
            source,
            normalizer,
            force_fresh: false,
        }
    }

    /// Starts a fresh cycle regardless of history
    pub fn force_fresh(mut self, force_fresh: bool) -> Self {
        self.force_fresh = force_fresh;
        self
    }

    /// Runs one bounded invocation
    ///
    /// 1. Select a run (fresh, resume, or nothing to do)
    /// 2. For a fresh cycle, fetch the listing and create the run
    /// 3. Attempt eligible entities within the budgets, checkpointing as it goes
    /// 4. Evaluate the outcome
    /// 5. Publish the newest healthy run unless the threshold was breached
    /// 6. Rotate old runs
    ///
    /// # Returns
    ///
    /// * `Ok(RunReport)` - The invocation finished; the report carries the outcome
    /// * `Err(HarvestError)` - The listing could not be fetched or history could not be read
    pub async fn run(&self) -> Result<RunReport, HarvestError> {
        let settings = &self.ctx.settings;
        let policy = self.ctx.policy();

        let selection = history::select_run(
            &self.ctx.layout,
            settings,
            self.ctx.now(),
            self.force_fresh,
        )?;

        let (run, action, attempted, stop, summary) = match selection {
            Selection::UpToDate { run, summary, .. } => {
                (run, RunAction::UpToDate, 0, StopReason::Skipped, summary)
            }
            Selection::Resume { run, mut store } => {
                let (attempted, stop) = self.process(run, &mut store).await;
                let summary = evaluate(&store, &policy, settings.failure_threshold_percent);
                (run, RunAction::Resumed, attempted, stop, summary)
            }
            Selection::Fresh => {
                let (run, mut store) = self.start_cycle().await?;
                let (attempted, stop) = self.process(run, &mut store).await;
                let summary = evaluate(&store, &policy, settings.failure_threshold_percent);
                (run, RunAction::Started, attempted, stop, summary)
            }
        };

        tracing::info!(
            "Run {}: {} entities, {} succeeded, {} remaining, {} permanently failed ({:.2}%), complete: {}",
            run,
            summary.total,
            summary.succeeded,
            summary.remaining(),
            summary.permanently_failed,
            summary.permanent_failure_ratio * 100.0,
            summary.complete
        );

        let published = if summary.outcome.is_success() {
            match history::publish_latest(
                &self.ctx.layout,
                &policy,
                settings.failure_threshold_percent,
            ) {
                Ok(published) => published,
                Err(e) => {
                    tracing::error!("Failed to publish latest output: {}", e);
                    None
                }
            }
        } else {
            tracing::error!(
                "Permanent failure ratio {:.2}% exceeds threshold {}%, not publishing",
                summary.permanent_failure_ratio * 100.0,
                settings.failure_threshold_percent
            );
            None
        };

        let rotated = match history::rotate(&self.ctx.layout, settings.max_history) {
            Ok(rotated) => rotated,
            Err(e) => {
                tracing::error!("Failed to rotate run history: {}", e);
                Vec::new()
            }
        };

        Ok(RunReport {
            run,
            action,
            attempted,
            stop,
            summary,
            published,
            rotated,
        })
    }

    /// Fetches the listing and persists the new run's first checkpoint
    async fn start_cycle(&self) -> Result<(RunId, EntityStore), HarvestError> {
        tracing::info!("Fetching entity listing");
        let listing = self
            .source
            .fetch_entity_list()
            .await
            .map_err(HarvestError::Listing)?;

        if listing.is_empty() {
            return Err(HarvestError::EmptyListing);
        }

        let store = EntityStore::initialize(listing);
        let run = self.next_run_id()?;
        tracing::info!("Starting run {} with {} entities", run, store.len());

        self.ctx.layout.ensure_dirs()?;
        self.checkpoint(run, &store);

        Ok((run, store))
    }

    /// Id for a new run, strictly newer than every run on disk
    fn next_run_id(&self) -> Result<RunId, HarvestError> {
        let candidate = RunId::from_datetime(self.ctx.now());
        match self.ctx.layout.list_runs()?.first() {
            Some(&newest) if newest >= candidate => {
                let run = newest.successor();
                tracing::warn!(
                    "Run id {} is not newer than existing run {}, using {}",
                    candidate,
                    newest,
                    run
                );
                Ok(run)
            }
            _ => Ok(candidate),
        }
    }

    /// The bounded work loop
    ///
    /// Each eligible entity gets at most one attempt. The time budget is only
    /// checked between attempts; no politeness delay is spent once it is used up.
    async fn process(&self, run: RunId, store: &mut EntityStore) -> (usize, StopReason) {
        let settings = &self.ctx.settings;
        let policy = self.ctx.policy();
        let budget = RunBudget::start(settings.max_requests, settings.max_duration());

        let queue = store.work_queue(&policy);
        let eligible = queue.len();
        let slots = budget.remaining_slots(queue);
        let mut stop = if slots.len() < eligible {
            StopReason::RequestBudget
        } else {
            StopReason::QueueExhausted
        };

        tracing::info!(
            "Run {}: {} eligible entities, {} allowed this invocation",
            run,
            eligible,
            slots.len()
        );

        let timeout = settings.request_timeout();
        let mut attempted = 0;

        for id in slots {
            if attempted > 0 && !budget.time_exceeded() {
                tokio::time::sleep(settings.request_delay()).await;
            }

            if budget.time_exceeded() {
                tracing::info!(
                    "Time budget of {} minute(s) used up after {} attempts, stopping",
                    settings.max_minutes,
                    attempted
                );
                stop = StopReason::TimeBudget;
                break;
            }

            let outcome =
                match tokio::time::timeout(timeout, self.source.fetch_entity_detail(id)).await {
                    Ok(Ok(detail)) => AttemptOutcome::Success(detail),
                    Ok(Err(e)) => {
                        tracing::debug!("Entity {} failed: {}", id, e);
                        AttemptOutcome::Failure(e.to_string())
                    }
                    Err(_) => {
                        tracing::debug!("Entity {} timed out", id);
                        AttemptOutcome::Failure(format!(
                            "Request timed out after {}s",
                            timeout.as_secs()
                        ))
                    }
                };

            if let Err(e) = store.upsert_attempt(id, outcome, &policy, self.ctx.now()) {
                tracing::error!("Discarding attempt on entity {}: {}", id, e);
                continue;
            }
            attempted += 1;

            if attempted % settings.checkpoint_interval == 0 {
                tracing::info!(
                    "Progress: {} attempts in {:.1}s",
                    attempted,
                    budget.elapsed().as_secs_f64()
                );
                self.checkpoint(run, store);
            }
        }

        self.checkpoint(run, store);
        (attempted, stop)
    }

    /// Writes a checkpoint; failures are logged and the run continues
    fn checkpoint(&self, run: RunId, store: &EntityStore) {
        match write_checkpoint(&self.ctx.layout, run, store, &self.normalizer) {
            Ok(()) => tracing::debug!("Checkpoint written for run {}", run),
            Err(e) => tracing::error!("Checkpoint for run {} failed: {}", run, e),
        }
    }
}
