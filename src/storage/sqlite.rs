//! SQLite-backed filing store.
//!
//! One table, `filings`, keyed by `item_url`. Timestamps are stored as
//! `YYYY-MM-DDTHH:MM:SS.mmmZ` text so they sort and bucket by prefix.
//! The connection is opened in WAL mode; only one process should write to a
//! database file at a time.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::error::{AppError, Result};
use crate::models::{DateConfidence, Filing, format_timestamp};
use crate::storage::FilingStore;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS filings (
    item_url           TEXT PRIMARY KEY,
    source_listing_url TEXT NOT NULL,
    feed_url           TEXT NOT NULL,
    feed_title         TEXT NOT NULL,
    item_title         TEXT NOT NULL,
    item_date          TEXT NOT NULL,
    date_known         INTEGER NOT NULL,
    archive_url        TEXT NOT NULL DEFAULT '',
    first_seen         TEXT NOT NULL,
    last_seen          TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_filings_item_date ON filings (item_date);
CREATE INDEX IF NOT EXISTS idx_filings_archive_url ON filings (archive_url);
"#;

const UPSERT: &str = r#"
INSERT INTO filings (
    item_url, source_listing_url, feed_url, feed_title, item_title,
    item_date, date_known, archive_url, first_seen, last_seen
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
ON CONFLICT(item_url) DO UPDATE SET
    source_listing_url = excluded.source_listing_url,
    feed_url           = excluded.feed_url,
    feed_title         = excluded.feed_title,
    item_title         = excluded.item_title,
    item_date          = CASE WHEN excluded.date_known = 1
                              THEN excluded.item_date
                              ELSE filings.item_date END,
    date_known         = MAX(filings.date_known, excluded.date_known),
    archive_url        = CASE WHEN filings.archive_url = ''
                              THEN excluded.archive_url
                              ELSE filings.archive_url END,
    last_seen          = excluded.last_seen
"#;

const COLUMNS: &str = "item_url, source_listing_url, feed_url, feed_title, item_title, \
                       item_date, date_known, archive_url, first_seen, last_seen";

/// Filing store over a single SQLite connection.
pub struct SqliteFilingStore {
    conn: Mutex<Connection>,
}

impl SqliteFilingStore {
    /// Open (or create) a database file, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        log::debug!("Opened filing store at {}", path.display());
        Self::init(conn)
    }

    /// In-memory database, for tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Fold the WAL into the main database file, so the file alone is a
    /// complete snapshot.
    pub fn checkpoint(&self) -> Result<()> {
        self.conn()?
            .execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::store("filing store connection lock poisoned"))
    }

    fn query_filings<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<Filing>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, StoredRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(StoredRow::into_filing).collect()
    }
}

impl FilingStore for SqliteFilingStore {
    fn upsert(&self, filing: &Filing) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            UPSERT,
            params![
                filing.item_url,
                filing.source_listing_url,
                filing.feed_url,
                filing.feed_title,
                filing.item_title,
                format_timestamp(&filing.item_date),
                filing.date_confidence.is_known(),
                filing.archive_url,
                format_timestamp(&filing.first_seen),
                format_timestamp(&filing.last_seen),
            ],
        )?;
        Ok(())
    }

    fn exists_by_item_url(&self, item_url: &str) -> Result<bool> {
        let conn = self.conn()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM filings WHERE item_url = ?1",
                [item_url],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn exists_archive_for_url(&self, archive_url: &str) -> Result<bool> {
        if archive_url.is_empty() {
            return Ok(false);
        }
        let conn = self.conn()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM filings WHERE archive_url = ?1 LIMIT 1",
                [archive_url],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn archive_url_for_item(&self, item_url: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let url: Option<String> = conn
            .query_row(
                "SELECT archive_url FROM filings WHERE item_url = ?1",
                [item_url],
                |row| row.get(0),
            )
            .optional()?;
        Ok(url.filter(|u| !u.is_empty()))
    }

    fn get(&self, item_url: &str) -> Result<Option<Filing>> {
        let sql = format!("SELECT {COLUMNS} FROM filings WHERE item_url = ?1");
        Ok(self.query_filings(&sql, [item_url])?.into_iter().next())
    }

    fn query_by_date(&self, date: NaiveDate) -> Result<Vec<Filing>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM filings \
             WHERE substr(item_date, 1, 10) = ?1 AND date_known = 1 \
             ORDER BY item_date, item_url"
        );
        self.query_filings(&sql, [date.format("%Y-%m-%d").to_string()])
    }

    fn count(&self) -> Result<usize> {
        let conn = self.conn()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM filings", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    fn latest(&self) -> Result<Option<Filing>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM filings WHERE date_known = 1 \
             ORDER BY item_date DESC, item_url LIMIT 1"
        );
        Ok(self.query_filings(&sql, params![])?.into_iter().next())
    }
}

/// Raw column values, converted to a `Filing` outside the row callback.
struct StoredRow {
    item_url: String,
    source_listing_url: String,
    feed_url: String,
    feed_title: String,
    item_title: String,
    item_date: String,
    date_known: bool,
    archive_url: String,
    first_seen: String,
    last_seen: String,
}

impl StoredRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            item_url: row.get(0)?,
            source_listing_url: row.get(1)?,
            feed_url: row.get(2)?,
            feed_title: row.get(3)?,
            item_title: row.get(4)?,
            item_date: row.get(5)?,
            date_known: row.get(6)?,
            archive_url: row.get(7)?,
            first_seen: row.get(8)?,
            last_seen: row.get(9)?,
        })
    }

    fn into_filing(self) -> Result<Filing> {
        Ok(Filing {
            item_date: parse_stored(&self.item_date)?,
            first_seen: parse_stored(&self.first_seen)?,
            last_seen: parse_stored(&self.last_seen)?,
            date_confidence: if self.date_known {
                DateConfidence::Published
            } else {
                DateConfidence::Unknown
            },
            item_url: self.item_url,
            source_listing_url: self.source_listing_url,
            feed_url: self.feed_url,
            feed_title: self.feed_title,
            item_title: self.item_title,
            archive_url: self.archive_url,
        })
    }
}

fn parse_stored(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::parse("stored timestamp", format!("{value}: {e}")))
}
