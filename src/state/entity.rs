//! Entity records and the retry/completion rules that govern them

use crate::state::FetchStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable identifier of a catalog entity
pub type EntityId = u64;

/// Opaque detail payload returned by the remote service
pub type RawDetail = serde_json::Value;

/// One item of the remote listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEntity {
    pub id: EntityId,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, alias = "sub_resource_ids")]
    pub sub_resource_ids: Vec<String>,
}

/// Tracked state of one entity within a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRecord {
    pub id: EntityId,
    pub latitude: f64,
    pub longitude: f64,
    pub sub_resource_ids: Vec<String>,
    pub fetch_status: FetchStatus,
    pub attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub detail: Option<RawDetail>,
}

/// Error recorded when the service answers with a `null` detail
const EMPTY_DETAIL_ERROR: &str = "Empty detail payload";

/// Result of a single detail fetch attempt
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Success(RawDetail),
    Failure(String),
}

impl EntityRecord {
    /// Creates a never-attempted record from a listing item
    pub fn pending(raw: RawEntity) -> Self {
        Self {
            id: raw.id,
            latitude: raw.latitude,
            longitude: raw.longitude,
            sub_resource_ids: raw.sub_resource_ids,
            fetch_status: FetchStatus::Pending,
            attempts: 0,
            last_attempt_at: None,
            last_error: None,
            detail: None,
        }
    }

    /// Records one attempt. Callers must check eligibility first.
    ///
    /// A `null` payload counts as a failed attempt.
    pub(crate) fn apply_attempt(&mut self, outcome: AttemptOutcome, now: DateTime<Utc>) {
        self.attempts = self.attempts.saturating_add(1);
        self.last_attempt_at = Some(now);

        match outcome {
            AttemptOutcome::Success(payload) if payload.is_null() => {
                self.fetch_status = FetchStatus::Failed;
                self.last_error = Some(EMPTY_DETAIL_ERROR.to_string());
            }
            AttemptOutcome::Success(payload) => {
                self.fetch_status = FetchStatus::Succeeded;
                self.detail = Some(payload);
                self.last_error = None;
            }
            AttemptOutcome::Failure(message) => {
                self.fetch_status = FetchStatus::Failed;
                self.last_error = Some(message);
            }
        }
    }

    /// Checks the structural invariants a persisted record must satisfy
    pub fn check_invariants(&self) -> Result<(), String> {
        let pending = self.fetch_status == FetchStatus::Pending;

        if (self.attempts == 0) != pending {
            return Err(format!(
                "entity {}: status {} with {} attempts",
                self.id, self.fetch_status, self.attempts
            ));
        }

        if self.last_attempt_at.is_none() != pending {
            return Err(format!(
                "entity {}: status {} with inconsistent last attempt time",
                self.id, self.fetch_status
            ));
        }

        let succeeded = self.fetch_status.is_success();
        if self.detail.is_some() != succeeded {
            return Err(format!(
                "entity {}: status {} with inconsistent detail payload",
                self.id, self.fetch_status
            ));
        }

        if succeeded && self.last_error.is_some() {
            return Err(format!("entity {}: succeeded with an error", self.id));
        }

        Ok(())
    }
}

/// Retry budget shared by every entity of a run
///
/// `max_retries` caps the total number of attempts per entity, the successful
/// attempt included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// True if the entity should receive another attempt in some invocation
    pub fn is_retry_eligible(&self, entity: &EntityRecord) -> bool {
        match entity.fetch_status {
            FetchStatus::Pending => true,
            FetchStatus::Failed => entity.attempts < self.max_retries,
            FetchStatus::Succeeded => false,
        }
    }

    /// True if the entity exhausted its retry budget without success
    pub fn is_permanently_failed(&self, entity: &EntityRecord) -> bool {
        entity.fetch_status == FetchStatus::Failed && entity.attempts >= self.max_retries
    }

    /// True if no entity is retry-eligible
    pub fn is_run_complete<'a, I>(&self, entities: I) -> bool
    where
        I: IntoIterator<Item = &'a EntityRecord>,
    {
        !entities.into_iter().any(|e| self.is_retry_eligible(e))
    }
}
