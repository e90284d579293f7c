// src/services/extractor.rs

//! Filing extractor.
//!
//! Parses a (decoded, repaired) syndication document into an ordered list of
//! items. RSS 2.0 is what the registry serves; Atom is accepted as well.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::error::{AppError, Result};
use crate::models::{CandidateFiling, FeedItem, FeedTarget, ParsedFeed};
use crate::utils::resolve;

/// Field of the element currently being read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Link,
    Guid,
    Date,
}

#[derive(Debug, Default)]
struct ItemBuilder {
    title: String,
    link: String,
    guid: String,
    date: String,
}

impl ItemBuilder {
    fn field_mut(&mut self, field: Field) -> &mut String {
        match field {
            Field::Title => &mut self.title,
            Field::Link => &mut self.link,
            Field::Guid => &mut self.guid,
            Field::Date => &mut self.date,
        }
    }

    fn build(self) -> FeedItem {
        let link = if self.link.trim().is_empty() && is_url(&self.guid) {
            self.guid
        } else {
            self.link
        };
        FeedItem {
            title: normalize_whitespace(&self.title),
            link: link.trim().to_string(),
            published: parse_feed_date(&self.date),
        }
    }
}

/// Parser for per-entity feeds.
#[derive(Debug, Clone, Default)]
pub struct FilingExtractor;

impl FilingExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Parse a feed document into its title and items, in document order.
    pub fn parse(&self, xml: &str) -> Result<ParsedFeed> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut feed = ParsedFeed::default();
        let mut saw_root = false;
        let mut in_item = false;
        let mut item = ItemBuilder::default();
        let mut field: Option<Field> = None;
        let mut feed_title = String::new();
        let mut in_feed_title = false;

        loop {
            let event = reader
                .read_event()
                .map_err(|e| AppError::parse("feed", e))?;

            match event {
                Event::Start(ref e) => {
                    let name = local_name(e);
                    match name.as_str() {
                        "rss" | "feed" | "RDF" => saw_root = true,
                        "item" | "entry" => {
                            in_item = true;
                            item = ItemBuilder::default();
                        }
                        "title" if in_item => field = Some(Field::Title),
                        "title" if feed_title.is_empty() => in_feed_title = true,
                        "link" if in_item => {
                            if let Some(href) = attribute(e, "href")? {
                                item.link = href;
                            } else {
                                field = Some(Field::Link);
                            }
                        }
                        "guid" | "id" if in_item => field = Some(Field::Guid),
                        "pubDate" | "date" | "published" if in_item => {
                            item.date.clear();
                            field = Some(Field::Date)
                        }
                        "updated" if in_item && item.date.is_empty() => {
                            field = Some(Field::Date)
                        }
                        _ => {}
                    }
                }
                Event::Empty(ref e) => {
                    if in_item && local_name(e) == "link" && item.link.is_empty() {
                        if let Some(href) = attribute(e, "href")? {
                            item.link = href;
                        }
                    }
                }
                Event::Text(ref t) => {
                    let text = t.unescape().map_err(|e| AppError::parse("feed text", e))?;
                    if let Some(f) = field {
                        item.field_mut(f).push_str(&text);
                    } else if in_feed_title {
                        feed_title.push_str(&text);
                    }
                }
                Event::CData(ref c) => {
                    let text = String::from_utf8_lossy(c).into_owned();
                    if let Some(f) = field {
                        item.field_mut(f).push_str(&text);
                    } else if in_feed_title {
                        feed_title.push_str(&text);
                    }
                }
                Event::End(ref e) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    match name.as_str() {
                        "item" | "entry" if in_item => {
                            in_item = false;
                            field = None;
                            feed.items.push(std::mem::take(&mut item).build());
                        }
                        "title" => {
                            in_feed_title = false;
                            field = None;
                        }
                        _ => field = None,
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !saw_root {
            return Err(AppError::parse("feed", "no rss or feed root element"));
        }

        feed.title = normalize_whitespace(&feed_title);
        Ok(feed)
    }

    /// Turn parsed items into candidate filings for a feed target.
    ///
    /// Relative links are resolved against the feed URL. Items without a
    /// link cannot be keyed and are returned separately.
    pub fn candidates(
        &self,
        target: &FeedTarget,
        feed: ParsedFeed,
    ) -> (Vec<CandidateFiling>, Vec<FeedItem>) {
        let mut candidates = Vec::with_capacity(feed.items.len());
        let mut rejected = Vec::new();

        for item in feed.items {
            if item.link.is_empty() {
                rejected.push(item);
                continue;
            }
            let item_url = resolve(&target.feed_url, &item.link).unwrap_or(item.link);
            candidates.push(CandidateFiling {
                source_listing_url: target.listing_url.clone(),
                feed_url: target.feed_url.clone(),
                feed_title: feed.title.clone(),
                item_url,
                item_title: item.title,
                published: item.published,
            });
        }
        (candidates, rejected)
    }
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn attribute(e: &BytesStart<'_>, name: &str) -> Result<Option<String>> {
    let attr = e
        .try_get_attribute(name)
        .map_err(|err| AppError::parse("feed attribute", err))?;
    match attr {
        Some(attr) => {
            let value = attr
                .unescape_value()
                .map_err(|err| AppError::parse("feed attribute", err))?;
            Ok(Some(value.into_owned()))
        }
        None => Ok(None),
    }
}

fn is_url(s: &str) -> bool {
    let s = s.trim();
    s.starts_with("http://") || s.starts_with("https://")
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse a feed date into UTC.
///
/// Accepts RFC 2822, RFC 3339, `YYYY-MM-DD HH:MM:SS` and `YYYY-MM-DD`; naive
/// values are taken as UTC. Returns `None` for empty or unparseable input.
pub fn parse_feed_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%d/%m/%Y %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    for format in ["%Y-%m-%d", "%d/%m/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
        }
    }

    log::debug!("Unparseable feed date: {:?}", raw);
    None
}
