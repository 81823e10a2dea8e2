//! State module for tracking harvest progress
//!
//! This module provides the per-entity state and the rules deciding which
//! entities still need work.
//!
//! # Components
//!
//! - `FetchStatus`: detail-fetch status of one entity (pending, succeeded, failed)
//! - `EntityRecord`: everything tracked about one entity within a run
//! - `RetryPolicy`: retry eligibility, permanent failure and run completion

mod entity;
mod fetch_status;

// Re-export main types
pub use entity::{AttemptOutcome, EntityId, EntityRecord, RawDetail, RawEntity, RetryPolicy};
pub use fetch_status::FetchStatus;
