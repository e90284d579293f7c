// src/services/listing.rs

//! Listing enumerator.
//!
//! Walks the registry's alphabetic browse index, one page per letter, and
//! maps every entity code found on a page to its feed URL.

use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::{self, Stream, StreamExt};
use scraper::{Html, Selector};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{FeedTarget, SourceConfig};
use crate::services::FeedFetcher;
use crate::utils::query_param;

/// Query parameter carrying the registration code in entity links.
const CODE_PARAM: &str = "regno";

/// Outcome of fetching one listing page.
#[derive(Debug)]
pub struct ListingPage {
    pub letter: char,
    pub url: String,
    pub targets: Result<Vec<FeedTarget>>,
}

/// Service for enumerating per-entity feeds.
pub struct ListingEnumerator {
    fetcher: Arc<FeedFetcher>,
    source: SourceConfig,
    link_selector: Selector,
}

impl ListingEnumerator {
    /// Create an enumerator; fails if the configured link selector is invalid.
    pub fn new(fetcher: Arc<FeedFetcher>, source: SourceConfig) -> Result<Self> {
        let link_selector = parse_selector(&source.listing_link_selector)?;
        Ok(Self {
            fetcher,
            source,
            link_selector,
        })
    }

    /// Lazily fetch listing pages in letter order.
    ///
    /// A failed page is reported in its `ListingPage` and does not stop the
    /// stream. Calling this again restarts enumeration from the first letter.
    pub fn pages(&self) -> impl Stream<Item = ListingPage> + '_ {
        stream::iter(self.source.letters.clone()).then(move |letter| async move {
            let url = self.source.listing_url(letter);
            let targets = self.fetch_page(&url).await;
            ListingPage {
                letter,
                url,
                targets,
            }
        })
    }

    async fn fetch_page(&self, url: &str) -> Result<Vec<FeedTarget>> {
        let html = self.fetcher.fetch_listing(url).await?;
        let codes = self.extract_codes(&html, url)?;
        log::debug!("{} entity codes on {}", codes.len(), url);

        Ok(codes
            .into_iter()
            .map(|code| FeedTarget {
                feed_url: self.source.feed_url(&code),
                code,
                listing_url: url.to_string(),
            })
            .collect())
    }

    /// Extract entity codes from a listing page, in page order, without repeats.
    ///
    /// The code is read from the link's `regno` parameter, falling back to
    /// the link text.
    pub fn extract_codes(&self, html: &str, page_url: &str) -> Result<Vec<String>> {
        let base = Url::parse(page_url)?;
        let document = Html::parse_document(html);

        let mut seen = HashSet::new();
        let mut codes = Vec::new();
        for link in document.select(&self.link_selector) {
            let from_href = link
                .value()
                .attr("href")
                .and_then(|href| query_param(&base, href, CODE_PARAM));
            let code = from_href
                .unwrap_or_else(|| link.text().collect::<String>())
                .trim()
                .to_string();

            if !is_valid_code(&code) {
                continue;
            }
            if seen.insert(code.clone()) {
                codes.push(code);
            }
        }
        Ok(codes)
    }
}

/// Codes go into a URL path, so they must be non-empty and free of
/// whitespace and path separators.
fn is_valid_code(code: &str) -> bool {
    !code.is_empty()
        && code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
}
