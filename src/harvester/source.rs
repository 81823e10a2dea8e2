//! Remote catalog access
//!
//! This module handles all requests to the remote service:
//! - Building the HTTP client with user agent and timeouts
//! - Fetching the entity listing
//! - Fetching one entity's detail payload
//! - Classifying failures (status, timeout, transport, malformed payload)

use crate::config::SourceConfig;
use crate::state::{EntityId, RawDetail, RawEntity};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by an [`EntitySource`]
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP error for {url}: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Request timeout for {url}")]
    Timeout { url: String },

    #[error("Malformed payload from {url}: {message}")]
    Decode { url: String, message: String },
}

/// The remote catalog: one listing call, one detail call per entity
#[async_trait]
pub trait EntitySource: Send + Sync {
    /// Fetches the full listing of entities
    async fn fetch_entity_list(&self) -> Result<Vec<RawEntity>, SourceError>;

    /// Fetches the detail payload of one entity
    async fn fetch_entity_detail(&self, id: EntityId) -> Result<RawDetail, SourceError>;
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `user_agent` - Value of the User-Agent header
/// * `timeout` - Timeout applied to every request
///
/// # Example
///
/// ```no_run
/// use station_harvester::harvester::build_http_client;
/// use std::time::Duration;
///
/// let client = build_http_client("station-harvester/1.0", Duration::from_secs(30)).unwrap();
/// ```
pub fn build_http_client(user_agent: &str, timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .gzip(true)
        .brotli(true)
        .build()
}

/// [`EntitySource`] backed by a JSON-over-HTTP catalog
///
/// The listing URL must return a JSON array of entities; the detail URL
/// template has its `{id}` placeholder replaced by the entity id.
pub struct HttpSource {
    client: Client,
    list_url: String,
    detail_url: String,
}

impl HttpSource {
    pub fn new(config: &SourceConfig, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_http_client(&config.user_agent, timeout)?,
            list_url: config.list_url.clone(),
            detail_url: config.detail_url.clone(),
        })
    }

    fn detail_url(&self, id: EntityId) -> String {
        self.detail_url.replace("{id}", &id.to_string())
    }

    async fn get_json(&self, url: &str) -> Result<serde_json::Value, SourceError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| classify(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| classify(url, e))?;
        serde_json::from_slice(&body).map_err(|e| SourceError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl EntitySource for HttpSource {
    async fn fetch_entity_list(&self) -> Result<Vec<RawEntity>, SourceError> {
        let value = self.get_json(&self.list_url).await?;
        serde_json::from_value(value).map_err(|e| SourceError::Decode {
            url: self.list_url.clone(),
            message: e.to_string(),
        })
    }

    async fn fetch_entity_detail(&self, id: EntityId) -> Result<RawDetail, SourceError> {
        let url = self.detail_url(id);
        tracing::debug!("Fetching detail for entity {} from {}", id, url);
        self.get_json(&url).await
    }
}

fn classify(url: &str, error: reqwest::Error) -> SourceError {
    if error.is_timeout() {
        SourceError::Timeout {
            url: url.to_string(),
        }
    } else {
        SourceError::Http {
            url: url.to_string(),
            source: error,
        }
    }
}
