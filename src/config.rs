// src/config.rs

//! Configuration loading utilities.
//!
//! The TOML file provides the base configuration, environment variables
//! override credentials and locations, and the result is validated before
//! any run begins.

use std::path::Path;

use crate::error::{AppError, Result};
use crate::models::Config;

/// Environment variables recognised on top of the config file.
pub const ENV_DB_PATH: &str = "FILINGS_DB_PATH";
pub const ENV_ARCHIVE_ENABLED: &str = "ARCHIVE_ENABLED";
pub const ENV_ARCHIVE_BACKEND: &str = "ARCHIVE_BACKEND";
pub const ENV_ARCHIVE_BUCKET: &str = "ARCHIVE_BUCKET";
pub const ENV_ARCHIVE_REGION: &str = "ARCHIVE_REGION";
pub const ENV_ARCHIVE_PUBLIC_BASE_URL: &str = "ARCHIVE_PUBLIC_BASE_URL";
pub const ENV_REQUEST_INTERVAL_MS: &str = "REQUEST_INTERVAL_MS";
pub const ENV_CRAWL_TIMEOUT_SECS: &str = "CRAWL_TIMEOUT_SECS";

/// Load the config file (defaults if missing), apply environment overrides
/// and validate.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = Config::load_or_default(path)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

/// Build a config purely from defaults and the environment.
pub fn config_from_env() -> Result<Config> {
    let mut config = Config::default();
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

/// Apply overrides from a key lookup (normally the process environment).
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = lookup(ENV_DB_PATH) {
        config.store.database_path = path;
    }
    if let Some(enabled) = lookup(ENV_ARCHIVE_ENABLED) {
        config.archive.enabled = parse_bool(ENV_ARCHIVE_ENABLED, &enabled)?;
    }
    if let Some(backend) = lookup(ENV_ARCHIVE_BACKEND) {
        config.archive.backend = backend.parse()?;
    }
    if let Some(bucket) = lookup(ENV_ARCHIVE_BUCKET) {
        config.archive.bucket = bucket;
    }
    if let Some(region) = lookup(ENV_ARCHIVE_REGION) {
        config.archive.region = region;
    }
    if let Some(base) = lookup(ENV_ARCHIVE_PUBLIC_BASE_URL) {
        config.archive.public_base_url = base;
    }
    if let Some(interval) = lookup(ENV_REQUEST_INTERVAL_MS) {
        config.crawler.request_interval_ms = parse_number(ENV_REQUEST_INTERVAL_MS, &interval)?;
    }
    if let Some(timeout) = lookup(ENV_CRAWL_TIMEOUT_SECS) {
        config.crawler.timeout_secs = parse_number(ENV_CRAWL_TIMEOUT_SECS, &timeout)?;
    }
    Ok(())
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(AppError::config(format!("{key}: expected a boolean, got {other:?}"))),
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|e| AppError::config(format!("{key}: {e}")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::models::ArchiveBackend;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn overrides_apply() {
        let mut config = Config::default();
        apply_env_overrides(
            &mut config,
            lookup(&[
                (ENV_DB_PATH, "/tmp/f.sqlite"),
                (ENV_ARCHIVE_ENABLED, "true"),
                (ENV_ARCHIVE_BACKEND, "s3"),
                (ENV_ARCHIVE_BUCKET, "epa-rss"),
                (ENV_REQUEST_INTERVAL_MS, "500"),
            ]),
        )
        .unwrap();

        assert_eq!(config.store.database_path, "/tmp/f.sqlite");
        assert!(config.archive.enabled);
        assert_eq!(config.archive.backend, ArchiveBackend::S3);
        assert_eq!(config.archive.bucket, "epa-rss");
        assert_eq!(config.crawler.request_interval_ms, 500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unparseable_file_stops_startup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[store]\ndatabase_path = /no/quotes\n").unwrap();
        assert!(matches!(load_config(&path), Err(AppError::Config(_))));
    }

    #[test]
    fn archive_enabled_without_bucket_is_fatal() {
        let mut config = Config::default();
        apply_env_overrides(&mut config, lookup(&[(ENV_ARCHIVE_ENABLED, "1")])).unwrap();
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn malformed_values_are_config_errors() {
        let mut config = Config::default();
        let err = apply_env_overrides(&mut config, lookup(&[(ENV_ARCHIVE_ENABLED, "maybe")]))
            .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));

        let err = apply_env_overrides(&mut config, lookup(&[(ENV_CRAWL_TIMEOUT_SECS, "soon")]))
            .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));

        let err = apply_env_overrides(&mut config, lookup(&[(ENV_ARCHIVE_BACKEND, "ftp")]))
            .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
