//! AWS S3 object store.
//!
//! Archived documents are written with a single `PutObject`, which S3 makes
//! visible all at once. Existence checks use `HeadObject`.

use std::time::Duration;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, timeout::TimeoutConfig};
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;

use crate::error::{AppError, Result};
use crate::models::ArchiveConfig;
use crate::storage::ObjectStore;
use crate::utils::object_url;

/// S3-backed object store.
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    base_url: String,
}

impl S3ObjectStore {
    /// Create a store over an existing client.
    pub fn new(client: Client, bucket: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Create a store from archive settings and the SDK's credential chain.
    pub async fn from_config(config: &ArchiveConfig) -> Result<Self> {
        if config.bucket.trim().is_empty() {
            return Err(AppError::config("archive.bucket is required for the s3 backend"));
        }

        let timeouts = TimeoutConfig::builder()
            .operation_timeout(Duration::from_secs(config.timeout_secs))
            .build();
        let mut loader = aws_config::defaults(BehaviorVersion::latest()).timeout_config(timeouts);
        if !config.region.is_empty() {
            loader = loader.region(Region::new(config.region.clone()));
        }
        let sdk_config = loader.load().await;

        Ok(Self::new(
            Client::new(&sdk_config),
            config.bucket.clone(),
            config.resolved_base_url(),
        ))
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn url_for(&self, key: &str) -> String {
        object_url(&self.base_url, key)
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String> {
        let len = bytes.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| {
                AppError::object_store(format!(
                    "put s3://{}/{}: {}",
                    self.bucket,
                    key,
                    e.into_service_error()
                ))
            })?;

        log::info!("Wrote {} bytes to s3://{}/{}", len, self.bucket, key);
        Ok(self.url_for(key))
    }

    async fn head_exists(&self, key: &str) -> Result<bool> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_not_found() {
                    Ok(false)
                } else {
                    Err(AppError::object_store(format!(
                        "head s3://{}/{}: {}",
                        self.bucket, key, service_err
                    )))
                }
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(output) => {
                let bytes = output.body.collect().await.map_err(|e| {
                    AppError::object_store(format!("read s3://{}/{}: {}", self.bucket, key, e))
                })?;
                Ok(Some(bytes.into_bytes().to_vec()))
            }
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_no_such_key() {
                    log::info!("No object at s3://{}/{}", self.bucket, key);
                    Ok(None)
                } else {
                    Err(AppError::object_store(format!(
                        "get s3://{}/{}: {}",
                        self.bucket, key, service_err
                    )))
                }
            }
        }
    }
}
