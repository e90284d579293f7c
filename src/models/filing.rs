//! Filing data structures.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// How much the stored `item_date` can be trusted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DateConfidence {
    /// Taken from the feed's publish date
    Published,
    /// The feed gave no usable date; `item_date` is the first-seen time
    Unknown,
}

impl DateConfidence {
    pub fn is_known(self) -> bool {
        matches!(self, DateConfidence::Published)
    }
}

/// A regulatory filing as persisted in the store, keyed by `item_url`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Filing {
    /// Listing page the entity was discovered under
    pub source_listing_url: String,

    /// Per-entity feed that contained this filing
    pub feed_url: String,

    /// Entity/submitter name at time of fetch
    pub feed_title: String,

    /// Canonical document URL (dedup key)
    pub item_url: String,

    /// Filing title
    pub item_title: String,

    /// Best-known publication timestamp, UTC
    pub item_date: DateTime<Utc>,

    /// Whether `item_date` is genuine or a placeholder
    pub date_confidence: DateConfidence,

    /// Mirrored copy in object storage; empty until archived
    pub archive_url: String,

    /// First time any run observed this filing
    pub first_seen: DateTime<Utc>,

    /// Most recent run that observed this filing
    pub last_seen: DateTime<Utc>,
}

impl Filing {
    /// `item_date` rendered the way it is stored and exported.
    pub fn item_date_iso(&self) -> String {
        format_timestamp(&self.item_date)
    }

    pub fn is_archived(&self) -> bool {
        !self.archive_url.is_empty()
    }
}

/// Render a timestamp as `YYYY-MM-DDTHH:MM:SS.mmmZ`.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A per-entity feed discovered on a listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedTarget {
    /// Registration code of the entity (e.g. `P1115-01`)
    pub code: String,

    /// Feed URL built from the code
    pub feed_url: String,

    /// Listing page the code was found on
    pub listing_url: String,
}

/// One item of a parsed syndication feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    pub published: Option<DateTime<Utc>>,
}

/// A parsed syndication feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedFeed {
    pub title: String,
    pub items: Vec<FeedItem>,
}

/// A filing extracted from a feed, before dedup and persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFiling {
    pub source_listing_url: String,
    pub feed_url: String,
    pub feed_title: String,
    pub item_url: String,
    pub item_title: String,
    pub published: Option<DateTime<Utc>>,
}

impl CandidateFiling {
    /// Turn the candidate into a storable record.
    ///
    /// Undated candidates take `seen_at` as a placeholder date and are
    /// flagged `Unknown`; the store keeps the first placeholder it saw.
    pub fn into_filing(self, archive_url: String, seen_at: DateTime<Utc>) -> Filing {
        let (item_date, date_confidence) = match self.published {
            Some(date) => (date, DateConfidence::Published),
            None => (seen_at, DateConfidence::Unknown),
        };

        Filing {
            source_listing_url: self.source_listing_url,
            feed_url: self.feed_url,
            feed_title: self.feed_title,
            item_url: self.item_url,
            item_title: self.item_title,
            item_date,
            date_confidence,
            archive_url,
            first_seen: seen_at,
            last_seen: seen_at,
        }
    }
}
