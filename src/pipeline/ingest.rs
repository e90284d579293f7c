// src/pipeline/ingest.rs

//! Ingestion pipeline.
//!
//! A single worker walks the listing pages in letter order, then each
//! discovered feed in listing order, then each item in feed order. Per feed:
//!
//! ```text
//! Enumerated -> Fetching -> Parsed -> (per item: DedupChecked -> Archiving? -> Persisting) -> Done
//! ```
//!
//! Failures are caught where they happen, logged with their URL and counted
//! in the [`RunSummary`]; none of them stop the run.

use std::collections::HashSet;
use std::pin::pin;
use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use futures::StreamExt;
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::models::{CandidateFiling, Config, FeedTarget};
use crate::services::{
    ArchiveAction, ArchiveUploader, DedupGate, FeedFetcher, FilingExtractor, ListingEnumerator,
    RateLimiter,
};
use crate::storage::{FilingStore, ObjectStore};
use crate::utils::http::SourceClient;

/// Counters for one pipeline run.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RunSummary {
    pub listing_pages: usize,
    pub listing_failures: usize,
    pub feeds_enumerated: usize,
    pub feeds_processed: usize,
    pub feeds_skipped: usize,
    pub items_discovered: usize,
    /// Items without a usable link
    pub items_invalid: usize,
    /// Items already evaluated earlier in this run
    pub items_duplicate: usize,
    pub items_archived: usize,
    pub archive_backfilled: usize,
    pub archive_failures: usize,
    pub items_persisted: usize,
    /// Persisted items that had no row before this run
    pub items_new: usize,
    pub persist_failures: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    fn started(at: DateTime<Utc>) -> Self {
        Self {
            listing_pages: 0,
            listing_failures: 0,
            feeds_enumerated: 0,
            feeds_processed: 0,
            feeds_skipped: 0,
            items_discovered: 0,
            items_invalid: 0,
            items_duplicate: 0,
            items_archived: 0,
            archive_backfilled: 0,
            archive_failures: 0,
            items_persisted: 0,
            items_new: 0,
            persist_failures: 0,
            started_at: at,
            finished_at: at,
        }
    }

    /// Turn persistence failures into an error, so the process exits non-zero.
    pub fn into_result(self) -> Result<Self> {
        if self.persist_failures > 0 {
            Err(AppError::Persistence {
                failures: self.persist_failures,
            })
        } else {
            Ok(self)
        }
    }

    pub fn log(&self) {
        log::info!(
            "Listing pages: {} ({} failed)",
            self.listing_pages,
            self.listing_failures
        );
        log::info!(
            "Feeds: {} enumerated, {} processed, {} skipped",
            self.feeds_enumerated,
            self.feeds_processed,
            self.feeds_skipped
        );
        log::info!(
            "Items: {} discovered, {} invalid, {} repeated in run",
            self.items_discovered,
            self.items_invalid,
            self.items_duplicate
        );
        log::info!(
            "Archive: {} uploaded, {} backfilled, {} failed",
            self.items_archived,
            self.archive_backfilled,
            self.archive_failures
        );
        log::info!(
            "Store: {} persisted ({} new), {} failed",
            self.items_persisted,
            self.items_new,
            self.persist_failures
        );
    }
}

/// Discovers, archives and persists filings.
pub struct IngestionPipeline {
    enumerator: ListingEnumerator,
    fetcher: Arc<FeedFetcher>,
    extractor: FilingExtractor,
    gate: DedupGate,
    uploader: Option<ArchiveUploader>,
    store: Arc<dyn FilingStore>,
}

impl IngestionPipeline {
    /// Wire the pipeline's services together.
    ///
    /// One limiter is shared by every request to the source, including
    /// document downloads. Pass `objects` to enable archiving.
    pub fn new(
        config: &Config,
        client: Arc<dyn SourceClient>,
        store: Arc<dyn FilingStore>,
        objects: Option<Arc<dyn ObjectStore>>,
    ) -> Result<Self> {
        let limiter = Arc::new(RateLimiter::from_config(&config.crawler));
        let fetcher = Arc::new(FeedFetcher::new(client, limiter));
        let enumerator = ListingEnumerator::new(Arc::clone(&fetcher), config.source.clone())?;

        let (gate, uploader) = match objects {
            Some(objects) => (
                DedupGate::new(
                    Arc::clone(&store),
                    Arc::clone(&objects),
                    config.archive.key_prefix.clone(),
                    config.archive.check_object_store,
                ),
                Some(ArchiveUploader::new(Arc::clone(&fetcher), objects)),
            ),
            None => (DedupGate::without_archive(Arc::clone(&store)), None),
        };

        Ok(Self {
            enumerator,
            fetcher,
            extractor: FilingExtractor::new(),
            gate,
            uploader,
            store,
        })
    }

    /// Run once over every listing page.
    ///
    /// The run timestamp is kept at the store's millisecond precision, so
    /// stored placeholders and `first_seen` equal `started_at`.
    pub async fn run(&self) -> RunSummary {
        let seen_at = Utc::now().trunc_subsecs(3);
        let mut summary = RunSummary::started(seen_at);
        log::info!("Ingestion run starting");

        let mut visited_feeds = HashSet::new();
        let mut seen_items = HashSet::new();

        let mut pages = pin!(self.enumerator.pages());
        while let Some(page) = pages.next().await {
            summary.listing_pages += 1;
            let targets = match page.targets {
                Ok(targets) => targets,
                Err(e) => {
                    log::warn!(
                        "Skipping listing letter {} ({}): {}",
                        page.letter,
                        page.url,
                        e
                    );
                    summary.listing_failures += 1;
                    continue;
                }
            };
            log::info!("Letter {}: {} feeds", page.letter, targets.len());

            for target in targets {
                if !visited_feeds.insert(target.feed_url.clone()) {
                    log::debug!("Feed {} already visited this run", target.feed_url);
                    continue;
                }
                summary.feeds_enumerated += 1;
                self.process_feed(&target, seen_at, &mut seen_items, &mut summary)
                    .await;
            }
        }

        summary.finished_at = Utc::now().trunc_subsecs(3);
        summary.log();
        summary
    }

    /// Fetch, parse and ingest one feed. Errors skip the feed.
    async fn process_feed(
        &self,
        target: &FeedTarget,
        seen_at: DateTime<Utc>,
        seen_items: &mut HashSet<String>,
        summary: &mut RunSummary,
    ) {
        let xml = match self.fetcher.fetch_feed(&target.feed_url).await {
            Ok(xml) => xml,
            Err(e) => {
                log::warn!("Skipping feed {}: {}", target.feed_url, e);
                summary.feeds_skipped += 1;
                return;
            }
        };

        let feed = match self.extractor.parse(&xml) {
            Ok(feed) => feed,
            Err(e) => {
                log::warn!("Skipping unparseable feed {}: {}", target.feed_url, e);
                summary.feeds_skipped += 1;
                return;
            }
        };

        let (candidates, rejected) = self.extractor.candidates(target, feed);
        for item in &rejected {
            log::warn!(
                "Dropping item without link in {}: {:?}",
                target.feed_url,
                item.title
            );
        }
        summary.items_invalid += rejected.len();
        summary.items_discovered += candidates.len();
        log::debug!("{} items in {}", candidates.len(), target.feed_url);

        for candidate in candidates {
            if !seen_items.insert(candidate.item_url.clone()) {
                summary.items_duplicate += 1;
                continue;
            }
            self.process_item(candidate, seen_at, summary).await;
        }
        summary.feeds_processed += 1;
    }

    /// Gate, archive if needed, then upsert. Archive failures never block the upsert.
    async fn process_item(
        &self,
        candidate: CandidateFiling,
        seen_at: DateTime<Utc>,
        summary: &mut RunSummary,
    ) {
        let item_url = candidate.item_url.clone();

        let (action, is_new) = match self.gate.check(&item_url).await {
            Ok(decision) => (decision.archive, !decision.already_stored),
            Err(e) => {
                log::warn!("Dedup check failed for {}, not archiving: {}", item_url, e);
                (ArchiveAction::Disabled, false)
            }
        };

        let archive_url = match (action, &self.uploader) {
            (ArchiveAction::Needed { key }, Some(uploader)) => {
                match uploader.archive(&item_url, &key).await {
                    Ok(url) => {
                        summary.items_archived += 1;
                        url
                    }
                    Err(e) => {
                        log::warn!("Archive failed for {}: {}", item_url, e);
                        summary.archive_failures += 1;
                        String::new()
                    }
                }
            }
            (ArchiveAction::AlreadyArchived { archive_url }, _) => archive_url,
            (ArchiveAction::Backfill { archive_url }, _) => {
                summary.archive_backfilled += 1;
                archive_url
            }
            _ => String::new(),
        };

        let filing = candidate.into_filing(archive_url, seen_at);
        match self.store.upsert(&filing) {
            Ok(()) => {
                summary.items_persisted += 1;
                if is_new {
                    log::debug!("New filing {}", item_url);
                    summary.items_new += 1;
                } else {
                    log::debug!("Refreshed filing {}", item_url);
                }
            }
            Err(e) => {
                log::error!("Failed to persist {}: {}", item_url, e);
                summary.persist_failures += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::models::DateConfidence;
    use crate::pipeline::export::render_csv;
    use crate::testing::{FakeSource, MemoryObjectStore, RecordingStore};

    const LISTING_A: &str = r#"<div class="licSearchTable">
        <a href="view.jsp?regno=P0001-01">P0001-01</a>
        <a href="view.jsp?regno=P0002-01">P0002-01</a>
    </div>"#;

    const LISTING_B: &str = r#"<div class="licSearchTable">
        <a href="view.jsp?regno=P0001-01">P0001-01</a>
    </div>"#;

    const FEED_ACME: &str = r#"<?xml version="1.0" encoding="utf-8"?>
        <rss version="2.0"><channel><title>Acme Ltd</title>
          <item><title>Annual report</title><link>https://site/a.pdf</link>
                <pubDate>Fri, 05 Jan 2024 00:00:00 GMT</pubDate></item>
          <item><title>Site notice</title><link>https://site/b.pdf</link></item>
        </channel></rss>"#;

    const FEED_BETA: &str = r#"<rss version="2.0"><channel><title>Beta & Sons</title>
          <item><title>Licence review</title><link>https://site/c.pdf</link>
                <pubDate>Sat, 06 Jan 2024 10:00:00 GMT</pubDate></item>
        </channel></rss>"#;

    fn config(letters: &[char]) -> Config {
        let mut config = Config::default();
        config.source.listing_url_template = "https://site/search.jsp?name={letter}*".to_string();
        config.source.feed_url_template = "https://site/rss/{code}.xml".to_string();
        config.source.letters = letters.to_vec();
        config.crawler.request_interval_ms = 0;
        config.archive.enabled = true;
        config.archive.key_prefix = "uploads/".to_string();
        config.archive.check_object_store = true;
        config
    }

    fn source() -> FakeSource {
        FakeSource::new()
            .with_text("https://site/search.jsp?name=A*", LISTING_A)
            .with_text("https://site/search.jsp?name=B*", LISTING_B)
            .with_text("https://site/rss/P0001-01.xml", FEED_ACME)
            .with_text("https://site/rss/P0002-01.xml", FEED_BETA)
            .with_body("https://site/a.pdf", b"%PDF a".to_vec())
            .with_body("https://site/b.pdf", b"%PDF b".to_vec())
            .with_body("https://site/c.pdf", b"%PDF c".to_vec())
    }

    fn pipeline(
        config: &Config,
        source: Arc<FakeSource>,
        store: Arc<RecordingStore>,
        objects: Option<Arc<MemoryObjectStore>>,
    ) -> IngestionPipeline {
        let objects = objects.map(|o| o as Arc<dyn ObjectStore>);
        IngestionPipeline::new(config, source, store, objects).unwrap()
    }

    #[tokio::test]
    async fn dated_and_undated_items_are_stored() {
        let store = Arc::new(RecordingStore::new());
        let objects = Arc::new(MemoryObjectStore::new());
        let pipeline = pipeline(
            &config(&['A']),
            Arc::new(source()),
            store.clone(),
            Some(objects.clone()),
        );

        let summary = pipeline.run().await;
        assert_eq!(summary.feeds_processed, 2);
        assert_eq!(summary.items_persisted, 3);
        assert_eq!(summary.items_new, 3);
        assert_eq!(summary.items_archived, 3);

        let a = store.get("https://site/a.pdf").unwrap().unwrap();
        assert_eq!(a.item_date_iso(), "2024-01-05T00:00:00.000Z");
        assert_eq!(a.date_confidence, DateConfidence::Published);
        assert_eq!(a.feed_title, "Acme Ltd");
        assert_eq!(a.archive_url, "https://bucket.test/uploads/a.pdf");

        let b = store.get("https://site/b.pdf").unwrap().unwrap();
        assert_eq!(b.date_confidence, DateConfidence::Unknown);
        assert_eq!(b.item_date, summary.started_at);
        assert_eq!(b.first_seen, summary.started_at);
        assert_eq!(summary.started_at.timestamp_subsec_nanos() % 1_000_000, 0);

        let day = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        let rows = store.query_by_date(day).unwrap();
        assert_eq!(rows.len(), 1);
        let csv = render_csv(&rows).unwrap();
        assert_eq!(csv.lines().count(), 2);
        assert!(csv.contains("https://site/a.pdf"));
    }

    #[tokio::test]
    async fn existing_object_is_not_uploaded_again() {
        let store = Arc::new(RecordingStore::new());
        let objects = Arc::new(MemoryObjectStore::new().with_object("uploads/a.pdf", b"%PDF a"));
        let source = FakeSource::new()
            .with_text("https://site/search.jsp?name=A*", LISTING_B)
            .with_text(
                "https://site/rss/P0001-01.xml",
                r#"<rss><channel><title>Acme Ltd</title>
                   <item><title>Annual report</title><link>https://site/a.pdf</link></item>
                   </channel></rss>"#,
            );
        let source = Arc::new(source);
        let pipeline = pipeline(
            &config(&['A']),
            source.clone(),
            store.clone(),
            Some(objects.clone()),
        );

        let summary = pipeline.run().await;
        assert!(objects.puts().is_empty());
        assert_eq!(store.upserts(), vec!["https://site/a.pdf"]);
        assert_eq!(summary.archive_backfilled, 1);
        assert_eq!(source.request_count("https://site/a.pdf"), 0);
        assert_eq!(
            store.archive_url_for_item("https://site/a.pdf").unwrap().as_deref(),
            Some("https://bucket.test/uploads/a.pdf")
        );
    }

    #[tokio::test]
    async fn second_run_refreshes_metadata_without_archiving() {
        let store = Arc::new(RecordingStore::new());
        let objects = Arc::new(MemoryObjectStore::new());
        let pipeline = pipeline(
            &config(&['A']),
            Arc::new(source()),
            store.clone(),
            Some(objects.clone()),
        );

        pipeline.run().await;
        assert_eq!(objects.puts().len(), 3);
        let first = store.get("https://site/b.pdf").unwrap().unwrap();

        store.clear_upserts();
        let summary = pipeline.run().await;
        assert_eq!(objects.puts().len(), 3);
        assert_eq!(summary.items_archived, 0);
        assert_eq!(summary.items_persisted, 3);
        assert_eq!(summary.items_new, 0);
        assert_eq!(store.upserts().len(), 3);
        assert_eq!(store.count().unwrap(), 3);

        let again = store.get("https://site/b.pdf").unwrap().unwrap();
        assert_eq!(again.item_date, first.item_date);
        assert_eq!(again.first_seen, first.first_seen);
        assert_eq!(again.date_confidence, DateConfidence::Unknown);
    }

    #[tokio::test]
    async fn feed_failure_does_not_affect_other_feeds() {
        let store = Arc::new(RecordingStore::new());
        let source = FakeSource::new()
            .with_text("https://site/search.jsp?name=A*", LISTING_A)
            .with_text("https://site/rss/P0002-01.xml", FEED_BETA);
        let pipeline = pipeline(&config(&['A']), Arc::new(source), store.clone(), None);

        let summary = pipeline.run().await;
        assert_eq!(summary.feeds_enumerated, 2);
        assert_eq!(summary.feeds_skipped, 1);
        assert_eq!(summary.feeds_processed, 1);
        assert_eq!(store.upserts(), vec!["https://site/c.pdf"]);
        assert!(!store.exists_by_item_url("https://site/a.pdf").unwrap());
    }

    #[tokio::test]
    async fn malformed_feed_is_skipped() {
        let store = Arc::new(RecordingStore::new());
        let source = FakeSource::new()
            .with_text("https://site/search.jsp?name=A*", LISTING_A)
            .with_text("https://site/rss/P0001-01.xml", "<html><body>Error</body></html>")
            .with_text("https://site/rss/P0002-01.xml", FEED_BETA);
        let pipeline = pipeline(&config(&['A']), Arc::new(source), store.clone(), None);

        let summary = pipeline.run().await;
        assert_eq!(summary.feeds_skipped, 1);
        assert_eq!(summary.items_persisted, 1);
    }

    #[tokio::test]
    async fn failed_listing_letter_is_counted_and_skipped() {
        let store = Arc::new(RecordingStore::new());
        let source = FakeSource::new()
            .with_text("https://site/search.jsp?name=B*", LISTING_B)
            .with_text("https://site/rss/P0001-01.xml", FEED_ACME);
        let pipeline = pipeline(&config(&['A', 'B']), Arc::new(source), store.clone(), None);

        let summary = pipeline.run().await;
        assert_eq!(summary.listing_pages, 2);
        assert_eq!(summary.listing_failures, 1);
        assert_eq!(summary.items_persisted, 2);
    }

    #[tokio::test]
    async fn each_feed_is_visited_once_per_run() {
        let store = Arc::new(RecordingStore::new());
        let source = Arc::new(source());
        let pipeline = pipeline(&config(&['A', 'B']), source.clone(), store.clone(), None);

        let summary = pipeline.run().await;
        assert_eq!(summary.feeds_enumerated, 2);
        assert_eq!(source.request_count("https://site/rss/P0001-01.xml"), 1);
        assert_eq!(store.upserts().len(), 3);
    }

    #[tokio::test]
    async fn repeated_item_is_evaluated_once() {
        let store = Arc::new(RecordingStore::new());
        let objects = Arc::new(MemoryObjectStore::new());
        let source = FakeSource::new()
            .with_text("https://site/search.jsp?name=A*", LISTING_A)
            .with_text("https://site/rss/P0001-01.xml", FEED_BETA)
            .with_text("https://site/rss/P0002-01.xml", FEED_BETA)
            .with_body("https://site/c.pdf", b"%PDF c".to_vec());
        let pipeline = pipeline(
            &config(&['A']),
            Arc::new(source),
            store.clone(),
            Some(objects.clone()),
        );

        let summary = pipeline.run().await;
        assert_eq!(summary.items_duplicate, 1);
        assert_eq!(store.upserts(), vec!["https://site/c.pdf"]);
        assert_eq!(objects.puts(), vec!["uploads/c.pdf"]);
    }

    #[tokio::test]
    async fn archive_failure_still_persists_metadata() {
        let store = Arc::new(RecordingStore::new());
        let objects = Arc::new(MemoryObjectStore::new());
        let source = FakeSource::new()
            .with_text("https://site/search.jsp?name=A*", LISTING_B)
            .with_text("https://site/rss/P0001-01.xml", FEED_ACME)
            .with_body("https://site/b.pdf", b"%PDF b".to_vec());
        let pipeline = pipeline(
            &config(&['A']),
            Arc::new(source),
            store.clone(),
            Some(objects.clone()),
        );

        let summary = pipeline.run().await;
        assert_eq!(summary.archive_failures, 1);
        assert_eq!(summary.items_archived, 1);
        assert_eq!(summary.items_persisted, 2);

        let a = store.get("https://site/a.pdf").unwrap().unwrap();
        assert!(a.archive_url.is_empty());
        assert_eq!(objects.puts(), vec!["uploads/b.pdf"]);
    }

    #[tokio::test]
    async fn persistence_failures_surface_after_the_run() {
        let store = Arc::new(RecordingStore::failing());
        let pipeline = pipeline(&config(&['A']), Arc::new(source()), store.clone(), None);

        let summary = pipeline.run().await;
        assert_eq!(summary.feeds_processed, 2);
        assert_eq!(summary.persist_failures, 3);
        assert_eq!(store.upserts().len(), 3);

        match summary.into_result() {
            Err(AppError::Persistence { failures }) => assert_eq!(failures, 3),
            other => panic!("expected persistence error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn archiving_disabled_never_touches_documents() {
        let store = Arc::new(RecordingStore::new());
        let source = Arc::new(source());
        let pipeline = pipeline(&config(&['A']), source.clone(), store.clone(), None);

        let summary = pipeline.run().await;
        assert_eq!(summary.items_archived, 0);
        assert_eq!(source.request_count("https://site/a.pdf"), 0);
        assert!(summary.into_result().is_ok());
    }
}
