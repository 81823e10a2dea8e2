//! Output module for clean projections and run outcomes
//!
//! This module handles:
//! - Normalizing succeeded entities into the clean output artifact
//! - Computing completeness, failure ratios and the process outcome
//! - Printing run statistics

mod normalize;
mod outcome;
pub mod stats;

pub use normalize::{build_output, CleanEntity, FieldNormalizer, Normalizer};
pub use outcome::{evaluate, exceeds_threshold, OutcomeSummary, RunOutcome};
pub use stats::print_statistics;
