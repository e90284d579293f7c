// src/utils/http.rs

//! HTTP client utilities.
//!
//! All traffic to the source site goes through a [`SourceClient`], which lets
//! the pipeline run against an in-process fake in tests.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::CrawlerConfig;

/// Create a configured asynchronous HTTP client.
pub fn create_async_client(config: &CrawlerConfig) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    Ok(client)
}

/// Read-only byte source for listing pages, feeds and documents.
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// GET a URL and return the raw body. Non-success statuses are errors.
    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>>;
}

/// `SourceClient` over a reqwest client.
#[derive(Clone)]
pub struct HttpSource {
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub fn from_config(config: &CrawlerConfig) -> Result<Self> {
        Ok(Self::new(create_async_client(config)?))
    }
}

#[async_trait]
impl SourceClient for HttpSource {
    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .header(
                reqwest::header::ACCEPT,
                "application/rss+xml, text/xml;q=0.9, */*;q=0.1",
            )
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::transport(url, format!("HTTP status {status}")));
        }

        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }
}
