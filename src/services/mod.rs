//! Service layer for the filings crawler.
//!
//! This module contains the per-step logic the ingestion pipeline drives:
//! - Request throttling (`RateLimiter`)
//! - Source access and body decoding (`FeedFetcher`)
//! - Feed discovery (`ListingEnumerator`)
//! - Feed parsing (`FilingExtractor`)
//! - Archive decisions (`DedupGate`)
//! - Document archiving (`ArchiveUploader`)

mod archive;
mod dedup;
mod extractor;
mod fetcher;
mod listing;
mod rate_limit;

pub use archive::ArchiveUploader;
pub use dedup::{ArchiveAction, DedupDecision, DedupGate};
pub use extractor::{FilingExtractor, parse_feed_date};
pub use fetcher::{FeedFetcher, decode_body, repair_entities};
pub use listing::{ListingEnumerator, ListingPage};
pub use rate_limit::RateLimiter;
