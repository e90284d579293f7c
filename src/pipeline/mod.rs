//! Pipeline entry points.
//!
//! - `IngestionPipeline`: discover, archive and persist filings
//! - `DailyExport`: render a day's filings as CSV and RSS

pub mod export;
pub mod ingest;

pub use export::{DailyExport, export_date};
pub use ingest::{IngestionPipeline, RunSummary};
