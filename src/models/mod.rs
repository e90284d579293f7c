// src/models/mod.rs

//! Domain models for the filings crawler.

mod config;
mod filing;

// Re-export all public types
pub use config::{
    ArchiveBackend, ArchiveConfig, Config, CrawlerConfig, ExportConfig, SourceConfig, StoreConfig,
};
pub use filing::{
    CandidateFiling, DateConfidence, FeedItem, FeedTarget, Filing, ParsedFeed, format_timestamp,
};
