//! Filings Crawler CLI
//!
//! Local execution entry point. For AWS Lambda, use `filings-crawler-lambda`.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use filings_crawler::{
    config::load_config,
    error::Result,
    models::Config,
    pipeline::{DailyExport, IngestionPipeline, RunSummary, export_date},
    storage::{FilingStore, LocalObjectStore, SqliteFilingStore, object_store_from_config},
    utils::http::HttpSource,
};

/// Regulatory filings crawler
#[derive(Parser, Debug)]
#[command(
    name = "filings-crawler",
    version,
    about = "Discovers, archives and exports regulatory filings"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "storage/config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run full pipeline: Ingest → Export
    Run,

    /// Discover, archive and store filings
    Ingest,

    /// Write the daily CSV and RSS outputs
    Export {
        /// Day to export (default: today minus the configured lag)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Validate configuration
    Validate,

    /// Show store contents
    Info,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

async fn ingest(config: &Config, store: Arc<SqliteFilingStore>) -> Result<RunSummary> {
    let client = Arc::new(HttpSource::from_config(&config.crawler)?);
    let objects = if config.archive.enabled {
        Some(object_store_from_config(&config.archive).await?)
    } else {
        log::info!("Archiving disabled");
        None
    };

    let pipeline = IngestionPipeline::new(config, client, store, objects)?;
    Ok(pipeline.run().await)
}

async fn export(config: &Config, store: &dyn FilingStore, date: Option<NaiveDate>) -> Result<()> {
    let now = Utc::now();
    let date = match date {
        Some(date) => date,
        None => export_date(now.date_naive(), config.export.lag_days)?,
    };

    let output = LocalObjectStore::new(
        &config.export.output_dir,
        format!("file://{}", config.export.output_dir),
    );
    let export = DailyExport::build(store, &config.export, date, now)?;
    for path in export.publish(&output, "").await? {
        log::info!("Wrote {}", path);
    }
    Ok(())
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    log::info!("Filings crawler starting...");

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            log::error!("Config validation failed: {}", e);
            return Err(e);
        }
    };
    log::info!("Loaded configuration from {}", cli.config.display());

    if let Command::Validate = cli.command {
        log::info!("✓ Config OK");
        return Ok(());
    }

    let store = Arc::new(SqliteFilingStore::open(&config.store.database_path)?);

    match cli.command {
        Command::Run => {
            log::info!("Step 1/2: Ingesting filings...");
            let summary = ingest(&config, Arc::clone(&store)).await?;

            log::info!("Step 2/2: Exporting...");
            export(&config, store.as_ref(), None).await?;

            summary.into_result()?;
            log::info!("Pipeline complete!");
        }

        Command::Ingest => {
            ingest(&config, store).await?.into_result()?;
        }

        Command::Export { date } => {
            export(&config, store.as_ref(), date).await?;
        }

        Command::Info => {
            log::info!("Store: {}", config.store.database_path);
            log::info!("Filings: {}", store.count()?);
            match store.latest()? {
                Some(f) => log::info!(
                    "Latest: {} {} ({})",
                    f.item_date_iso(),
                    f.item_title,
                    f.feed_title
                ),
                None => log::info!("No dated filings yet."),
            }
        }

        Command::Validate => {}
    }

    log::info!("Done!");

    Ok(())
}
