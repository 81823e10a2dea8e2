use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for Station-Harvester
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub harvest: HarvestConfig,
    pub source: SourceConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Per-invocation budgets and cross-invocation policy
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Maximum number of detail requests per invocation
    #[serde(rename = "max-requests")]
    pub max_requests: u32,

    /// Maximum wall-clock minutes per invocation
    #[serde(rename = "max-minutes")]
    pub max_minutes: u64,

    /// Maximum attempts per entity (the successful attempt included)
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    /// Permanent-failure ratio (percent) above which an invocation fails
    #[serde(rename = "failure-threshold-percent")]
    pub failure_threshold_percent: f64,

    /// Minimum days between the start of two healthy cycles
    #[serde(rename = "min-interval-days")]
    pub min_interval_days: i64,

    /// Number of run snapshots kept after rotation
    #[serde(rename = "max-history")]
    pub max_history: usize,

    /// Politeness delay between consecutive detail requests (milliseconds)
    #[serde(rename = "request-delay-ms")]
    pub request_delay_ms: u64,

    /// Timeout for a single request (seconds)
    #[serde(rename = "request-timeout-secs")]
    pub request_timeout_secs: u64,

    /// Number of processed entities between checkpoints
    #[serde(rename = "checkpoint-interval")]
    pub checkpoint_interval: usize,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            max_requests: 500,
            max_minutes: 30,
            max_retries: 3,
            failure_threshold_percent: 2.0,
            min_interval_days: 7,
            max_history: 5,
            request_delay_ms: 500,
            request_timeout_secs: 30,
            checkpoint_interval: 10,
        }
    }
}

impl HarvestConfig {
    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_minutes.saturating_mul(60))
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Remote catalog endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// URL returning the full entity listing
    #[serde(rename = "list-url")]
    pub list_url: String,

    /// Detail URL template; `{id}` is replaced by the entity id
    #[serde(rename = "detail-url")]
    pub detail_url: String,

    /// User agent sent with every request
    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,
}

fn default_user_agent() -> String {
    format!("station-harvester/{}", env!("CARGO_PKG_VERSION"))
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Directory holding the `state/` and `output/` artifact directories
    #[serde(rename = "data-dir", default = "default_data_dir")]
    pub data_dir: String,

    /// Path of the published "latest known-good" output copy
    #[serde(rename = "latest-path", default)]
    pub latest_path: Option<String>,
}

fn default_data_dir() -> String {
    "./data".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            latest_path: None,
        }
    }
}

impl OutputConfig {
    /// Resolves the published alias path, defaulting to `<data-dir>/latest.json`
    pub fn latest_path(&self) -> PathBuf {
        match &self.latest_path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(&self.data_dir).join("latest.json"),
        }
    }
}
