// src/lambda/mod.rs

//! AWS Lambda handler for the filings crawler.
//!
//! Each invocation:
//! 1. Pulls the SQLite snapshot from the bucket (if one exists)
//! 2. Runs the ingestion pipeline against it
//! 3. Pushes the updated snapshot back
//! 4. Publishes the daily exports under `exports/`

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use lambda_runtime::{Error as LambdaError, LambdaEvent};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::config::config_from_env;
use crate::error::Result;
use crate::models::Config;
use crate::pipeline::{DailyExport, IngestionPipeline, RunSummary, export_date};
use crate::storage::{ObjectStore, S3ObjectStore, SqliteFilingStore, content_type_for};
use crate::utils::http::HttpSource;

/// Key prefix for exports written by the Lambda.
const EXPORT_PREFIX: &str = "exports/";

/// Lambda invocation payload.
#[derive(Debug, Default, Deserialize)]
pub struct IngestRequest {
    /// Skip the daily export step
    #[serde(default)]
    pub skip_export: bool,

    /// Day to export (default: today minus the configured lag)
    #[serde(default)]
    pub export_date: Option<NaiveDate>,
}

/// Lambda response payload.
#[derive(Debug, Default, Serialize)]
pub struct IngestResponse {
    /// Whether every filing was persisted
    pub success: bool,

    /// Run counters, absent if the run never started
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<RunSummary>,

    /// URLs of published exports
    pub exported: Vec<String>,

    /// Error message if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Execution time in milliseconds
    pub execution_time_ms: u64,
}

/// Main Lambda handler function.
#[instrument(skip(event))]
pub async fn handler(
    event: LambdaEvent<IngestRequest>,
) -> std::result::Result<IngestResponse, LambdaError> {
    let start = std::time::Instant::now();
    let (request, _context) = event.into_parts();

    info!(
        "Starting ingestion: skip_export={}, export_date={:?}",
        request.skip_export, request.export_date
    );

    let mut response = match run_ingest(&request).await {
        Ok(response) => response,
        Err(e) => {
            error!("Ingestion failed: {}", e);
            IngestResponse {
                error: Some(e.to_string()),
                ..Default::default()
            }
        }
    };
    response.execution_time_ms = start.elapsed().as_millis() as u64;
    info!(
        "Ingestion finished: success={} in {}ms",
        response.success, response.execution_time_ms
    );
    Ok(response)
}

/// Internal ingestion logic.
async fn run_ingest(request: &IngestRequest) -> Result<IngestResponse> {
    let config = config_from_env()?;
    let objects: Arc<dyn ObjectStore> =
        Arc::new(S3ObjectStore::from_config(&config.archive).await?);

    let db_path = snapshot_path(&config);
    pull_snapshot(objects.as_ref(), &config.store.db_snapshot_key, &db_path).await?;
    let store = Arc::new(SqliteFilingStore::open(&db_path)?);

    let client = Arc::new(HttpSource::from_config(&config.crawler)?);
    let archive = config.archive.enabled.then(|| Arc::clone(&objects));
    let pipeline = IngestionPipeline::new(&config, client, store.clone(), archive)?;
    let summary = pipeline.run().await;

    store.checkpoint()?;
    push_snapshot(objects.as_ref(), &config.store.db_snapshot_key, &db_path).await?;

    let mut exported = Vec::new();
    if !request.skip_export {
        let now = Utc::now();
        let date = match request.export_date {
            Some(date) => date,
            None => export_date(now.date_naive(), config.export.lag_days)?,
        };
        let export = DailyExport::build(store.as_ref(), &config.export, date, now)?;
        exported = export.publish(objects.as_ref(), EXPORT_PREFIX).await?;
    }

    let error = summary.clone().into_result().err().map(|e| e.to_string());
    if let Some(message) = &error {
        warn!("{}", message);
    }

    Ok(IngestResponse {
        success: error.is_none(),
        summary: Some(summary),
        exported,
        error,
        execution_time_ms: 0,
    })
}

/// Lambda only has `/tmp` writable, so the database lives there.
fn snapshot_path(config: &Config) -> PathBuf {
    let name = PathBuf::from(&config.store.database_path)
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("filings.sqlite"));
    std::env::temp_dir().join(name)
}

async fn pull_snapshot(objects: &dyn ObjectStore, key: &str, path: &Path) -> Result<()> {
    match objects.get(key).await? {
        Some(bytes) => {
            info!("Restored snapshot {} ({} bytes)", key, bytes.len());
            tokio::fs::write(path, bytes).await?;
        }
        None => {
            info!("No snapshot at {}, starting with an empty store", key);
            if tokio::fs::try_exists(path).await? {
                tokio::fs::remove_file(path).await?;
            }
        }
    }
    Ok(())
}

async fn push_snapshot(objects: &dyn ObjectStore, key: &str, path: &Path) -> Result<()> {
    let bytes = tokio::fs::read(path).await?;
    let size = bytes.len();
    objects.put(key, bytes, content_type_for(key)).await?;
    info!("Saved snapshot {} ({} bytes)", key, size);
    Ok(())
}
