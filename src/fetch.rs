//! Byte acquisition over HTTP.
//!
//! [`HttpFetcher`] downloads a URL with a bounded timeout and retries
//! transient failures with exponential backoff:
//! - HTTP 429 and 5xx → retry
//! - other 4xx → fail immediately
//! - transport errors (timeout, reset, DNS) → retry
//!
//! Every failure surfaces as [`RegwatchError::Network`], which the
//! orchestrator treats as "skip this candidate, keep going".

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, warn};

use crate::config::FetchConfig;
use crate::error::RegwatchError;

/// Bytes plus the server-declared content type.
#[derive(Debug, Clone)]
pub struct FetchedResource {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedResource, RegwatchError>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
    max_retries: u32,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, RegwatchError> {
        let client = build_client(config)?;
        Ok(Self {
            client,
            max_retries: config.max_retries,
        })
    }
}

/// Shared HTTP client construction for the fetcher and the link discovery.
pub fn build_client(config: &FetchConfig) -> Result<reqwest::Client, RegwatchError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .user_agent(config.user_agent.clone())
        .build()
        .map_err(|e| RegwatchError::Network {
            url: String::new(),
            message: format!("cannot build HTTP client: {}", e),
        })
}

fn network_error(url: &str, message: impl Into<String>) -> RegwatchError {
    RegwatchError::Network {
        url: url.to_string(),
        message: message.into(),
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedResource, RegwatchError> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                debug!(url, attempt, delay_secs = delay.as_secs(), "retrying fetch");
                tokio::time::sleep(delay).await;
            }

            match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let content_type = response
                            .headers()
                            .get(CONTENT_TYPE)
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        let bytes = response
                            .bytes()
                            .await
                            .map_err(|e| network_error(url, e.to_string()))?;
                        return Ok(FetchedResource {
                            bytes: bytes.to_vec(),
                            content_type,
                        });
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(url, %status, attempt, "transient HTTP status");
                        last_err = Some(network_error(url, format!("HTTP {}", status)));
                        continue;
                    }

                    return Err(network_error(url, format!("HTTP {}", status)));
                }
                Err(e) => {
                    warn!(url, attempt, error = %e, "fetch failed");
                    last_err = Some(network_error(url, e.to_string()));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| network_error(url, "fetch failed after retries")))
    }
}
