//! Local filesystem object store.
//!
//! Used for development and for runs without a bucket. Objects live under a
//! root directory at their key path:
//!
//! ```text
//! {root}/
//! └── uploads/
//!     ├── a.pdf
//!     └── b.pdf
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::storage::ObjectStore;
use crate::utils::object_url;

/// Object store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root_dir: PathBuf,
    base_url: String,
}

impl LocalObjectStore {
    /// Create a store rooted at `root_dir`, publishing objects under `base_url`.
    pub fn new(root_dir: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root_dir: root_dir.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Full path for a key. Keys may not escape the root.
    fn path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let escapes = relative.components().any(|c| {
            !matches!(c, std::path::Component::Normal(_) | std::path::Component::CurDir)
        });
        if key.is_empty() || escapes {
            return Err(AppError::object_store(format!("Invalid object key: {key}")));
        }
        Ok(self.root_dir.join(relative))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    fn url_for(&self, key: &str) -> String {
        object_url(&self.base_url, key)
    }

    /// Write to a sibling `.partial` file, then rename into place.
    /// The partial file is removed whenever the write does not complete.
    async fn put(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> Result<String> {
        let path = self.path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut tmp = path.clone().into_os_string();
        tmp.push(".partial");
        let tmp = PathBuf::from(tmp);

        if let Err(e) = write_then_rename(&tmp, &path, &bytes).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(AppError::Io(e));
        }

        log::debug!("Stored {} bytes at {}", bytes.len(), path.display());
        Ok(self.url_for(key))
    }

    async fn head_exists(&self, key: &str) -> Result<bool> {
        let path = self.path(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }
}

async fn write_then_rename(tmp: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(tmp).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    drop(file);
    tokio::fs::rename(tmp, path).await
}
