//! Per-invocation work budget
//!
//! An invocation may attempt at most `max_requests` entities and may not start
//! a new attempt once `max_duration` has elapsed. In-flight attempts are never
//! interrupted.

use crate::state::EntityId;
use std::time::Duration;
use tokio::time::Instant;

/// Request-count and wall-time ceilings of one invocation
#[derive(Debug, Clone)]
pub struct RunBudget {
    max_requests: usize,
    max_duration: Duration,
    started: Instant,
}

impl RunBudget {
    /// Starts the wall-time clock now
    pub fn start(max_requests: u32, max_duration: Duration) -> Self {
        Self {
            max_requests: max_requests as usize,
            max_duration,
            started: Instant::now(),
        }
    }

    /// Truncates the work queue to the request budget
    pub fn remaining_slots(&self, mut queue: Vec<EntityId>) -> Vec<EntityId> {
        queue.truncate(self.max_requests);
        queue
    }

    /// True once the wall-time budget is used up
    pub fn time_exceeded(&self) -> bool {
        self.started.elapsed() >= self.max_duration
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}
