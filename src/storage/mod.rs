//! Storage abstractions.
//!
//! Two stores back the pipeline:
//!
//! - [`FilingStore`]: the durable record of every filing, keyed by item URL
//! - [`ObjectStore`]: immutable archived copies of filing documents
//!
//! ## Object Layout
//!
//! ```text
//! {bucket}/
//! ├── uploads/                 # Archived documents, keyed by filename
//! │   ├── a.pdf
//! │   └── b.pdf
//! ├── latest/filings.sqlite    # Store snapshot (serverless runs)
//! └── exports/                 # Daily CSV and RSS outputs (serverless runs)
//! ```

pub mod local;
#[cfg(feature = "s3")]
pub mod s3;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::Result;
use crate::models::{ArchiveBackend, ArchiveConfig, Filing};

// Re-export for convenience
pub use local::LocalObjectStore;
#[cfg(feature = "s3")]
pub use s3::S3ObjectStore;
pub use sqlite::SqliteFilingStore;

/// Durable, idempotent record of filings keyed by `item_url`.
///
/// Every operation may be repeated with identical input without changing
/// observable state beyond the first call.
pub trait FilingStore: Send + Sync {
    /// Insert or update a filing by `item_url`.
    ///
    /// A non-empty `archive_url` is never replaced, and an `Unknown` date
    /// never replaces a stored date.
    fn upsert(&self, filing: &Filing) -> Result<()>;

    /// Whether any filing with this item URL exists.
    fn exists_by_item_url(&self, item_url: &str) -> Result<bool>;

    /// Whether any filing has already been archived at this archive URL.
    fn exists_archive_for_url(&self, archive_url: &str) -> Result<bool>;

    /// Stored archive URL for an item, if it has one.
    fn archive_url_for_item(&self, item_url: &str) -> Result<Option<String>>;

    /// Fetch one filing by item URL.
    fn get(&self, item_url: &str) -> Result<Option<Filing>>;

    /// Filings with a published date on the given UTC day, oldest first.
    fn query_by_date(&self, date: NaiveDate) -> Result<Vec<Filing>>;

    /// Number of stored filings.
    fn count(&self) -> Result<usize>;

    /// Most recently published filing, if any.
    fn latest(&self) -> Result<Option<Filing>>;
}

/// Object storage for archived documents.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Public URL an object is (or would be) reachable at.
    fn url_for(&self, key: &str) -> String;

    /// Store an object in a single all-or-nothing write and return its URL.
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String>;

    /// Whether an object exists under the key.
    async fn head_exists(&self, key: &str) -> Result<bool>;

    /// Read an object, `None` if it does not exist.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
}

/// Build the configured archive backend.
pub async fn object_store_from_config(config: &ArchiveConfig) -> Result<Arc<dyn ObjectStore>> {
    match config.backend {
        ArchiveBackend::Local => Ok(Arc::new(LocalObjectStore::new(
            &config.local_dir,
            config.resolved_base_url(),
        ))),
        #[cfg(feature = "s3")]
        ArchiveBackend::S3 => Ok(Arc::new(S3ObjectStore::from_config(config).await?)),
        #[cfg(not(feature = "s3"))]
        ArchiveBackend::S3 => Err(crate::error::AppError::config(
            "archive.backend = \"s3\" requires the s3 feature",
        )),
    }
}

/// Guess a content type from a key's extension.
pub fn content_type_for(key: &str) -> &'static str {
    let ext = key
        .rsplit('.')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "xml" => "application/rss+xml",
        "csv" => "text/csv",
        "sqlite" => "application/vnd.sqlite3",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => "application/octet-stream",
    }
}
