//! Page fetching.

use crate::config::DownloadConfig;
use crate::error::{Error, FetchError, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// Retrieves the HTML of a page
///
/// Implementations map every failure into a [`FetchError`]; the downloader
/// retries those with backoff.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch `url` and return the response body
    async fn fetch_page(&self, url: &str) -> std::result::Result<String, FetchError>;
}

/// [`PageFetcher`] over plain HTTP(S)
#[derive(Clone)]
pub struct HttpPageFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpPageFetcher {
    /// Build a fetcher using the user agent and fetch timeout from `config`
    pub fn new(config: &DownloadConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.fetch_timeout)
            .build()
            .map_err(|e| Error::Config {
                message: format!("failed to create HTTP client: {}", e),
                key: Some("user_agent".to_string()),
            })?;

        Ok(Self {
            client,
            timeout: config.fetch_timeout,
        })
    }

    fn map_error(&self, url: &str, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
                timeout: self.timeout,
            }
        } else if let Some(status) = e.status() {
            FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            }
        } else {
            FetchError::Network {
                url: url.to_string(),
                message: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch_page(&self, url: &str) -> std::result::Result<String, FetchError> {
        tracing::debug!(url, "Fetching page");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(url, status = status.as_u16(), "Page fetch returned error status");
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|e| self.map_error(url, e))
    }
}
