// src/services/archive.rs

//! Copies filing documents into object storage.

use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::services::FeedFetcher;
use crate::storage::{ObjectStore, content_type_for};

/// Downloads a document through the rate-limited fetcher and stores it
/// under the key chosen by the dedup gate.
pub struct ArchiveUploader {
    fetcher: Arc<FeedFetcher>,
    objects: Arc<dyn ObjectStore>,
}

impl ArchiveUploader {
    pub fn new(fetcher: Arc<FeedFetcher>, objects: Arc<dyn ObjectStore>) -> Self {
        Self { fetcher, objects }
    }

    /// Archive a document under `key` and return the archive URL.
    ///
    /// The body is fully downloaded before a single put, so a failed
    /// download never leaves an object behind.
    pub async fn archive(&self, item_url: &str, key: &str) -> Result<String> {
        let bytes = self.fetcher.fetch_bytes(item_url).await?;
        if bytes.is_empty() {
            return Err(AppError::transport(item_url, "empty document body"));
        }

        let size = bytes.len();
        let url = self.objects.put(key, bytes, content_type_for(key)).await?;
        log::info!("Archived {} ({} bytes) to {}", item_url, size, url);
        Ok(url)
    }
}
