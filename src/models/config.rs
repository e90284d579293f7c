//! Application configuration structures.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Longest publication lag accepted for the daily export.
pub const MAX_LAG_DAYS: i64 = 365;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Source registry URLs and selectors
    #[serde(default)]
    pub source: SourceConfig,

    /// HTTP and throttling behavior settings
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// Filing store location
    #[serde(default)]
    pub store: StoreConfig,

    /// Object storage for archived documents
    #[serde(default)]
    pub archive: ArchiveConfig,

    /// Daily CSV/RSS outputs
    #[serde(default)]
    pub export: ExportConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration, or defaults if the file does not exist.
    ///
    /// A file that exists but cannot be read or parsed is a config error.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(AppError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                log::warn!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(AppError::config(format!("{}: {}", path.display(), e))),
        }
    }

    /// Validate configuration values. Any failure here is fatal at startup.
    pub fn validate(&self) -> Result<()> {
        if !self.source.listing_url_template.contains("{letter}") {
            return Err(AppError::config(
                "source.listing_url_template must contain {letter}",
            ));
        }
        if !self.source.feed_url_template.contains("{code}") {
            return Err(AppError::config(
                "source.feed_url_template must contain {code}",
            ));
        }
        if self.source.listing_link_selector.trim().is_empty() {
            return Err(AppError::config("source.listing_link_selector is empty"));
        }
        if self.source.letters.is_empty() {
            return Err(AppError::config("source.letters is empty"));
        }
        if self.crawler.user_agent.trim().is_empty() {
            return Err(AppError::config("crawler.user_agent is empty"));
        }
        if self.crawler.timeout_secs == 0 {
            return Err(AppError::config("crawler.timeout_secs must be > 0"));
        }
        if self.crawler.burst == 0 {
            return Err(AppError::config("crawler.burst must be > 0"));
        }
        if !(0..=MAX_LAG_DAYS).contains(&self.export.lag_days) {
            return Err(AppError::config(format!(
                "export.lag_days must be between 0 and {MAX_LAG_DAYS}"
            )));
        }
        if self.store.database_path.trim().is_empty() {
            return Err(AppError::config("store.database_path is empty"));
        }
        if self.archive.enabled {
            match self.archive.backend {
                ArchiveBackend::S3 => {
                    if self.archive.bucket.trim().is_empty() {
                        return Err(AppError::config(
                            "archive.bucket is required for the s3 backend",
                        ));
                    }
                }
                ArchiveBackend::Local => {
                    if self.archive.local_dir.trim().is_empty() {
                        return Err(AppError::config(
                            "archive.local_dir is required for the local backend",
                        ));
                    }
                }
            }
            if self.archive.timeout_secs == 0 {
                return Err(AppError::config("archive.timeout_secs must be > 0"));
            }
        }
        Ok(())
    }
}

/// Source registry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Alphabetic browse page, `{letter}` is replaced by one index letter
    #[serde(default = "defaults::listing_url_template")]
    pub listing_url_template: String,

    /// Per-entity feed, `{code}` is replaced by the registration code
    #[serde(default = "defaults::feed_url_template")]
    pub feed_url_template: String,

    /// CSS selector for entity links on a listing page
    #[serde(default = "defaults::listing_link_selector")]
    pub listing_link_selector: String,

    /// Index letters to walk, in order
    #[serde(default = "defaults::letters")]
    pub letters: Vec<char>,
}

impl SourceConfig {
    pub fn listing_url(&self, letter: char) -> String {
        self.listing_url_template
            .replace("{letter}", &letter.to_string())
    }

    pub fn feed_url(&self, code: &str) -> String {
        self.feed_url_template.replace("{code}", code)
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            listing_url_template: defaults::listing_url_template(),
            feed_url_template: defaults::feed_url_template(),
            listing_link_selector: defaults::listing_link_selector(),
            letters: defaults::letters(),
        }
    }
}

/// HTTP client and throttling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds (listing, feed and document fetches)
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Minimum spacing between requests to the source site
    #[serde(default = "defaults::request_interval")]
    pub request_interval_ms: u64,

    /// Token bucket capacity
    #[serde(default = "defaults::burst")]
    pub burst: u32,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            request_interval_ms: defaults::request_interval(),
            burst: defaults::burst(),
        }
    }
}

/// Filing store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file
    #[serde(default = "defaults::database_path")]
    pub database_path: String,

    /// Object key of the database snapshot (serverless runs only)
    #[serde(default = "defaults::db_snapshot_key")]
    pub db_snapshot_key: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: defaults::database_path(),
            db_snapshot_key: defaults::db_snapshot_key(),
        }
    }
}

/// Which object store receives archived documents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveBackend {
    #[default]
    S3,
    Local,
}

impl std::str::FromStr for ArchiveBackend {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "s3" => Ok(Self::S3),
            "local" => Ok(Self::Local),
            other => Err(AppError::config(format!("Unknown archive backend: {other}"))),
        }
    }
}

/// Object storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Archive documents at all
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub backend: ArchiveBackend,

    /// Bucket name (s3 backend)
    #[serde(default)]
    pub bucket: String,

    /// Bucket region (s3 backend); empty uses the SDK default chain
    #[serde(default)]
    pub region: String,

    /// Prepended to every archive key
    #[serde(default = "defaults::key_prefix")]
    pub key_prefix: String,

    /// Public base URL for archived objects; derived from the bucket if empty
    #[serde(default)]
    pub public_base_url: String,

    /// Root directory (local backend)
    #[serde(default = "defaults::local_dir")]
    pub local_dir: String,

    /// Ask the object store whether a key exists before transferring
    #[serde(default = "defaults::check_object_store")]
    pub check_object_store: bool,

    /// Timeout for object-storage operations
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,
}

impl ArchiveConfig {
    /// Base URL under which archived keys are published.
    pub fn resolved_base_url(&self) -> String {
        if !self.public_base_url.trim().is_empty() {
            return self.public_base_url.trim_end_matches('/').to_string();
        }
        match self.backend {
            ArchiveBackend::S3 if self.region.is_empty() => {
                format!("https://{}.s3.amazonaws.com", self.bucket)
            }
            ArchiveBackend::S3 => format!("https://{}.s3.{}.amazonaws.com", self.bucket, self.region),
            ArchiveBackend::Local => format!("file://{}", self.local_dir.trim_end_matches('/')),
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            backend: ArchiveBackend::default(),
            bucket: String::new(),
            region: String::new(),
            key_prefix: defaults::key_prefix(),
            public_base_url: String::new(),
            local_dir: defaults::local_dir(),
            check_object_store: defaults::check_object_store(),
            timeout_secs: defaults::timeout(),
        }
    }
}

/// Daily export settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Root directory for CSV and RSS outputs
    #[serde(default = "defaults::output_dir")]
    pub output_dir: String,

    /// Days between today and the exported day
    #[serde(default = "defaults::lag_days")]
    pub lag_days: i64,

    #[serde(default = "defaults::feed_title")]
    pub feed_title: String,

    #[serde(default = "defaults::feed_link")]
    pub feed_link: String,

    #[serde(default = "defaults::feed_description")]
    pub feed_description: String,

    /// Author name on generated feed entries
    #[serde(default = "defaults::feed_author")]
    pub feed_author: String,

    /// Public location of `csv/daily/`, used by the latest feed
    #[serde(default = "defaults::csv_base_url")]
    pub csv_base_url: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: defaults::output_dir(),
            lag_days: defaults::lag_days(),
            feed_title: defaults::feed_title(),
            feed_link: defaults::feed_link(),
            feed_description: defaults::feed_description(),
            feed_author: defaults::feed_author(),
            csv_base_url: defaults::csv_base_url(),
        }
    }
}

mod defaults {
    // Source defaults
    pub fn listing_url_template() -> String {
        "https://epawebapp.epa.ie/terminalfour/ippc/ippc-search.jsp?name={letter}*&Submit=Browse"
            .into()
    }
    pub fn feed_url_template() -> String {
        "https://epawebapp.epa.ie/licences/lic_eDMS/rss/{code}.xml".into()
    }
    pub fn listing_link_selector() -> String {
        ".licSearchTable a".into()
    }
    pub fn letters() -> Vec<char> {
        ('A'..='Z').collect()
    }

    // Crawler defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; filings-crawler/0.1)".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn request_interval() -> u64 {
        250
    }
    pub fn burst() -> u32 {
        1
    }

    // Store defaults
    pub fn database_path() -> String {
        "sqlite/filings.sqlite".into()
    }
    pub fn db_snapshot_key() -> String {
        "latest/filings.sqlite".into()
    }

    // Archive defaults
    pub fn key_prefix() -> String {
        "uploads/".into()
    }
    pub fn local_dir() -> String {
        "archive".into()
    }
    pub fn check_object_store() -> bool {
        true
    }

    // Export defaults
    pub fn output_dir() -> String {
        "output".into()
    }
    pub fn lag_days() -> i64 {
        2
    }
    pub fn feed_title() -> String {
        "EPA Ireland RSS Feed".into()
    }
    pub fn feed_link() -> String {
        "https://epawebapp.epa.ie/terminalfour/ippc/ippc-search.jsp?name=B*&Submit=Browse".into()
    }
    pub fn feed_description() -> String {
        "RSS feed for EPA website".into()
    }
    pub fn feed_author() -> String {
        "EPA Ireland".into()
    }
    pub fn csv_base_url() -> String {
        "https://github.com/EPA-Ireland-Updates-Unofficial/epa-rss/blob/main/output/csv/daily/"
            .into()
    }
}
