/// Fetch status definitions for tracking per-entity detail retrieval
///
/// Whether a `Failed` entity may be retried is not stored here; it is derived
/// from the attempt count by [`crate::state::RetryPolicy`].
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents the detail-fetch state of a single entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    /// Listed but never attempted
    Pending,

    /// Detail payload was fetched
    Succeeded,

    /// Last attempt failed (retryable or permanent, depending on attempts)
    Failed,
}

impl FetchStatus {
    /// Returns true if an attempt may still be recorded from this status,
    /// before the retry budget is taken into account
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Failed)
    }

    /// Returns true if this represents a successful completion
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Converts the status to its on-disk string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// Returns all possible statuses
    pub fn all_statuses() -> [Self; 3] {
        [Self::Pending, Self::Succeeded, Self::Failed]
    }
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
