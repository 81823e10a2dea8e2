use crate::config::types::{Config, HarvestConfig, OutputConfig, SourceConfig};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_harvest_config(&config.harvest)?;
    validate_source_config(&config.source)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates budgets and failure policy
fn validate_harvest_config(config: &HarvestConfig) -> Result<(), ConfigError> {
    if config.max_requests < 1 {
        return Err(ConfigError::Validation(format!(
            "max_requests must be >= 1, got {}",
            config.max_requests
        )));
    }

    if config.max_minutes < 1 {
        return Err(ConfigError::Validation(format!(
            "max_minutes must be >= 1, got {}",
            config.max_minutes
        )));
    }

    if config.max_retries < 1 {
        return Err(ConfigError::Validation(format!(
            "max_retries must be >= 1, got {}",
            config.max_retries
        )));
    }

    if !(0.0..=100.0).contains(&config.failure_threshold_percent) {
        return Err(ConfigError::Validation(format!(
            "failure_threshold_percent must be between 0 and 100, got {}",
            config.failure_threshold_percent
        )));
    }

    if config.min_interval_days < 0 {
        return Err(ConfigError::Validation(format!(
            "min_interval_days must be >= 0, got {}",
            config.min_interval_days
        )));
    }

    if config.max_history < 1 {
        return Err(ConfigError::Validation(format!(
            "max_history must be >= 1, got {}",
            config.max_history
        )));
    }

    if config.request_timeout_secs < 1 {
        return Err(ConfigError::Validation(format!(
            "request_timeout_secs must be >= 1, got {}",
            config.request_timeout_secs
        )));
    }

    if config.checkpoint_interval < 1 {
        return Err(ConfigError::Validation(format!(
            "checkpoint_interval must be >= 1, got {}",
            config.checkpoint_interval
        )));
    }

    Ok(())
}

/// Validates the remote endpoints
fn validate_source_config(config: &SourceConfig) -> Result<(), ConfigError> {
    validate_http_url("list_url", &config.list_url)?;

    if !config.detail_url.contains("{id}") {
        return Err(ConfigError::Validation(format!(
            "detail_url must contain an {{id}} placeholder, got '{}'",
            config.detail_url
        )));
    }
    validate_http_url("detail_url", &config.detail_url.replace("{id}", "0"))?;

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user_agent cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.data_dir.is_empty() {
        return Err(ConfigError::Validation(
            "data_dir cannot be empty".to_string(),
        ));
    }

    if matches!(&config.latest_path, Some(path) if path.is_empty()) {
        return Err(ConfigError::Validation(
            "latest_path cannot be empty when set".to_string(),
        ));
    }

    Ok(())
}

/// Checks that a URL parses and uses an HTTP(S) scheme
fn validate_http_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {} '{}': {}", field, value, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "{} '{}' must use http or https",
            field, value
        )));
    }

    Ok(())
}
