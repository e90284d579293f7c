// src/pipeline/export.rs

//! Daily exports built from the filing store.
//!
//! For one UTC day this produces:
//!
//! ```text
//! csv/daily/{date}.csv   # one row per filing published that day
//! daily.xml              # RSS, one entry per filing
//! latest.xml             # RSS, one entry linking to the day's CSV
//! ```

use std::fmt;

use chrono::{DateTime, Days, NaiveDate, Utc};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use crate::error::{AppError, Result};
use crate::models::{ExportConfig, Filing};
use crate::storage::{FilingStore, ObjectStore, content_type_for};

const CSV_HEADER: [&str; 7] = [
    "Item Date",
    "Submitter",
    "Item",
    "Item URL",
    "Submitter URL",
    "Main Page URL",
    "Archive URL",
];

/// Day to export: `today` minus the configured publication lag.
pub fn export_date(today: NaiveDate, lag_days: i64) -> Result<NaiveDate> {
    u64::try_from(lag_days)
        .ok()
        .and_then(|lag| today.checked_sub_days(Days::new(lag)))
        .ok_or_else(|| AppError::config(format!("export.lag_days out of range: {lag_days}")))
}

/// Render filings as the fixed-column daily CSV.
pub fn render_csv(filings: &[Filing]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CSV_HEADER)?;
    for f in filings {
        writer.write_record([
            f.item_date_iso().as_str(),
            f.feed_title.as_str(),
            f.item_title.as_str(),
            f.item_url.as_str(),
            f.feed_url.as_str(),
            f.source_listing_url.as_str(),
            f.archive_url.as_str(),
        ])?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| AppError::parse("csv export", e))?;
    String::from_utf8(bytes).map_err(|e| AppError::parse("csv export", e))
}

/// Render the daily RSS feed, one entry per filing.
pub fn render_daily_rss(
    config: &ExportConfig,
    date: NaiveDate,
    filings: &[Filing],
    generated_at: DateTime<Utc>,
) -> Result<String> {
    let mut rss = RssWriter::start(
        &format!("{} {}", config.feed_title, date),
        &config.feed_link,
        &config.feed_description,
        generated_at,
    )?;
    for f in filings {
        rss.item(&RssItem {
            title: &f.item_title,
            link: &f.item_url,
            description: &f.item_title,
            content: &format!("{}: {}", f.feed_title, f.item_title),
            author: &config.feed_author,
            pub_date: f.item_date,
        })?;
    }
    rss.finish()
}

/// Render the "latest" RSS feed: a single entry pointing at the day's CSV.
pub fn render_latest_rss(
    config: &ExportConfig,
    date: NaiveDate,
    count: usize,
    generated_at: DateTime<Utc>,
) -> Result<String> {
    let title = format!("{} {}", config.feed_title, date);
    let link = csv_url(config, date);
    let description = format!("{count} filings published on {date}");

    let mut rss = RssWriter::start(
        &config.feed_title,
        &config.feed_link,
        &config.feed_description,
        generated_at,
    )?;
    rss.item(&RssItem {
        title: &title,
        link: &link,
        description: &description,
        content: &description,
        author: &config.feed_author,
        pub_date: generated_at,
    })?;
    rss.finish()
}

/// Public URL of a day's CSV.
pub fn csv_url(config: &ExportConfig, date: NaiveDate) -> String {
    format!("{}/{}.csv", config.csv_base_url.trim_end_matches('/'), date)
}

/// All outputs for one day, rendered and ready to publish.
#[derive(Debug, Clone)]
pub struct DailyExport {
    pub date: NaiveDate,
    pub rows: usize,
    pub csv: String,
    pub daily_rss: String,
    pub latest_rss: String,
}

impl DailyExport {
    /// Query the store for `date` and render every output.
    pub fn build(
        store: &dyn FilingStore,
        config: &ExportConfig,
        date: NaiveDate,
        generated_at: DateTime<Utc>,
    ) -> Result<Self> {
        let filings = store.query_by_date(date)?;
        Ok(Self {
            date,
            rows: filings.len(),
            csv: render_csv(&filings)?,
            daily_rss: render_daily_rss(config, date, &filings, generated_at)?,
            latest_rss: render_latest_rss(config, date, filings.len(), generated_at)?,
        })
    }

    /// Relative keys and contents of every output.
    pub fn files(&self) -> [(String, &str); 3] {
        [
            (format!("csv/daily/{}.csv", self.date), self.csv.as_str()),
            ("daily.xml".to_string(), self.daily_rss.as_str()),
            ("latest.xml".to_string(), self.latest_rss.as_str()),
        ]
    }

    /// Write every output under `prefix` and return the resulting URLs.
    pub async fn publish(&self, objects: &dyn ObjectStore, prefix: &str) -> Result<Vec<String>> {
        let mut urls = Vec::with_capacity(3);
        for (key, body) in self.files() {
            let key = format!("{prefix}{key}");
            let url = objects
                .put(&key, body.as_bytes().to_vec(), content_type_for(&key))
                .await?;
            urls.push(url);
        }
        log::info!(
            "Exported {} filings for {} ({} files)",
            self.rows,
            self.date,
            urls.len()
        );
        Ok(urls)
    }
}

struct RssItem<'a> {
    title: &'a str,
    link: &'a str,
    description: &'a str,
    content: &'a str,
    author: &'a str,
    pub_date: DateTime<Utc>,
}

/// Minimal RSS 2.0 writer over quick-xml events.
struct RssWriter {
    writer: Writer<Vec<u8>>,
}

impl RssWriter {
    fn start(
        title: &str,
        link: &str,
        description: &str,
        generated_at: DateTime<Utc>,
    ) -> Result<Self> {
        let mut rss = Self {
            writer: Writer::new_with_indent(Vec::new(), b' ', 2),
        };
        rss.event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        let mut root = BytesStart::new("rss");
        root.push_attribute(("version", "2.0"));
        root.push_attribute(("xmlns:content", "http://purl.org/rss/1.0/modules/content/"));
        rss.event(Event::Start(root))?;
        rss.event(Event::Start(BytesStart::new("channel")))?;
        rss.text_element("title", title)?;
        rss.text_element("link", link)?;
        rss.text_element("description", description)?;
        rss.text_element("lastBuildDate", &generated_at.to_rfc2822())?;
        Ok(rss)
    }

    fn item(&mut self, item: &RssItem<'_>) -> Result<()> {
        self.event(Event::Start(BytesStart::new("item")))?;
        self.text_element("title", item.title)?;
        self.text_element("link", item.link)?;
        self.text_element("guid", item.link)?;
        self.text_element("description", item.description)?;
        self.text_element("content:encoded", item.content)?;
        self.text_element("author", item.author)?;
        self.text_element("pubDate", &item.pub_date.to_rfc2822())?;
        self.event(Event::End(BytesEnd::new("item")))
    }

    fn finish(mut self) -> Result<String> {
        self.event(Event::End(BytesEnd::new("channel")))?;
        self.event(Event::End(BytesEnd::new("rss")))?;
        String::from_utf8(self.writer.into_inner()).map_err(xml_error)
    }

    fn text_element(&mut self, name: &str, text: &str) -> Result<()> {
        self.event(Event::Start(BytesStart::new(name)))?;
        self.event(Event::Text(BytesText::new(text)))?;
        self.event(Event::End(BytesEnd::new(name)))
    }

    fn event(&mut self, event: Event<'_>) -> Result<()> {
        self.writer.write_event(event).map_err(xml_error)
    }
}

fn xml_error(e: impl fmt::Display) -> AppError {
    AppError::parse("rss export", e)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::models::DateConfidence;
    use crate::services::FilingExtractor;
    use crate::storage::SqliteFilingStore;
    use crate::testing::MemoryObjectStore;

    fn filing(url: &str, title: &str, date: DateTime<Utc>) -> Filing {
        Filing {
            source_listing_url: "https://site/search.jsp?name=A*".to_string(),
            feed_url: "https://site/rss/P0001-01.xml".to_string(),
            feed_title: "Smith & Sons, Ltd".to_string(),
            item_url: url.to_string(),
            item_title: title.to_string(),
            item_date: date,
            date_confidence: DateConfidence::Published,
            archive_url: String::new(),
            first_seen: date,
            last_seen: date,
        }
    }

    fn export_config() -> ExportConfig {
        ExportConfig {
            feed_title: "EPA filings".to_string(),
            feed_link: "https://filings.test/".to_string(),
            csv_base_url: "https://filings.test/csv/daily/".to_string(),
            ..ExportConfig::default()
        }
    }

    #[test]
    fn export_date_applies_lag() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(
            export_date(today, 2).unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 28).unwrap()
        );
        assert_eq!(export_date(today, 0).unwrap(), today);
    }

    #[test]
    fn export_date_rejects_bad_lag() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert!(matches!(export_date(today, -1), Err(AppError::Config(_))));
        assert!(matches!(export_date(today, i64::MAX), Err(AppError::Config(_))));
    }

    #[test]
    fn csv_has_fixed_columns_and_quotes_commas() {
        let date = Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap();
        let csv = render_csv(&[filing("https://site/a.pdf", "Annual report", date)]).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("Item Date,Submitter,Item,Item URL,Submitter URL,Main Page URL,Archive URL")
        );
        assert_eq!(
            lines.next(),
            Some(
                "2024-01-05T00:00:00.000Z,\"Smith & Sons, Ltd\",Annual report,https://site/a.pdf,\
                 https://site/rss/P0001-01.xml,https://site/search.jsp?name=A*,"
            )
        );
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn empty_day_has_header_only() {
        assert_eq!(render_csv(&[]).unwrap().lines().count(), 1);
    }

    #[test]
    fn daily_rss_parses_back() {
        let date = Utc.with_ymd_and_hms(2024, 1, 5, 9, 30, 0).unwrap();
        let filings = vec![
            filing("https://site/a.pdf", "Annual <report>", date),
            filing("https://site/b.pdf", "Notice", date),
        ];
        let xml = render_daily_rss(
            &export_config(),
            date.date_naive(),
            &filings,
            Utc.with_ymd_and_hms(2024, 1, 7, 6, 0, 0).unwrap(),
        )
        .unwrap();

        assert!(xml.contains("Smith &amp; Sons, Ltd: Annual &lt;report&gt;"));
        let feed = FilingExtractor::new().parse(&xml).unwrap();
        assert_eq!(feed.title, "EPA filings 2024-01-05");
        assert_eq!(feed.items.len(), 2);
        assert_eq!(feed.items[0].title, "Annual <report>");
        assert_eq!(feed.items[0].link, "https://site/a.pdf");
        assert_eq!(feed.items[0].published, Some(date));
    }

    #[test]
    fn latest_rss_links_to_csv() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        let generated = Utc.with_ymd_and_hms(2024, 1, 7, 6, 0, 0).unwrap();
        let xml = render_latest_rss(&export_config(), date, 4, generated).unwrap();

        let feed = FilingExtractor::new().parse(&xml).unwrap();
        assert_eq!(feed.items.len(), 1);
        assert_eq!(feed.items[0].link, "https://filings.test/csv/daily/2024-01-05.csv");
        assert_eq!(feed.items[0].title, "EPA filings 2024-01-05");
    }

    #[tokio::test]
    async fn build_and_publish_day() {
        let store = SqliteFilingStore::open_in_memory().unwrap();
        let day = Utc.with_ymd_and_hms(2024, 1, 5, 12, 0, 0).unwrap();
        store
            .upsert(&filing("https://site/a.pdf", "Annual report", day))
            .unwrap();
        store
            .upsert(&filing(
                "https://site/z.pdf",
                "Other day",
                Utc.with_ymd_and_hms(2024, 1, 6, 12, 0, 0).unwrap(),
            ))
            .unwrap();

        let export = DailyExport::build(
            &store,
            &export_config(),
            day.date_naive(),
            Utc.with_ymd_and_hms(2024, 1, 7, 6, 0, 0).unwrap(),
        )
        .unwrap();
        assert_eq!(export.rows, 1);

        let objects = MemoryObjectStore::new();
        let urls = export.publish(&objects, "exports/").await.unwrap();
        assert_eq!(
            objects.puts(),
            vec![
                "exports/csv/daily/2024-01-05.csv",
                "exports/daily.xml",
                "exports/latest.xml"
            ]
        );
        assert_eq!(urls[1], "https://bucket.test/exports/daily.xml");

        let csv = String::from_utf8(objects.object("exports/csv/daily/2024-01-05.csv").unwrap())
            .unwrap();
        assert_eq!(csv.lines().count(), 2);
    }
}
