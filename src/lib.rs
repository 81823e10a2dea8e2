//! Station-Harvester: a resumable, budget-bounded catalog harvester
//!
//! This crate periodically sweeps a remote station catalog (one listing call plus
//! one detail call per station), checkpoints its progress to disk, and resumes
//! unfinished sweeps on the next invocation. Each invocation is bounded by a
//! request count and a wall-clock budget.

pub mod config;
pub mod harvester;
pub mod history;
pub mod output;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for Station-Harvester operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Listing fetch failed: {0}")]
    Listing(harvester::SourceError),

    #[error("Listing returned no entities")]
    EmptyListing,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Station-Harvester operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use harvester::{Harvester, RunContext, RunReport};
pub use output::{OutcomeSummary, RunOutcome};
pub use state::{EntityId, EntityRecord, FetchStatus, RetryPolicy};
pub use storage::{EntityStore, RunId};
