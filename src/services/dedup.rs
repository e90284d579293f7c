// src/services/dedup.rs

//! Decides, per candidate filing, whether its document must be archived.
//!
//! Metadata is always upserted; only the archive step is gated, since it is
//! the one costly side effect that must happen at most once per document.

use std::sync::Arc;

use crate::error::Result;
use crate::storage::{FilingStore, ObjectStore};
use crate::utils::archive_key;

/// What to do about a candidate's archived copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveAction {
    /// No archive exists yet; upload under `key`.
    Needed { key: String },
    /// An archive is already recorded for this document.
    AlreadyArchived { archive_url: String },
    /// The object exists in storage but the store does not know it yet.
    Backfill { archive_url: String },
    /// Archiving is switched off for this run.
    Disabled,
}

/// Outcome of the dedup check for one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupDecision {
    pub archive: ArchiveAction,
    /// A row with this item URL already exists, so the upsert is a refresh.
    pub already_stored: bool,
}

/// Read-only existence checks against the store and object storage.
pub struct DedupGate {
    store: Arc<dyn FilingStore>,
    objects: Option<Arc<dyn ObjectStore>>,
    key_prefix: String,
    check_object_store: bool,
}

impl DedupGate {
    /// Gate with archiving enabled.
    pub fn new(
        store: Arc<dyn FilingStore>,
        objects: Arc<dyn ObjectStore>,
        key_prefix: impl Into<String>,
        check_object_store: bool,
    ) -> Self {
        Self {
            store,
            objects: Some(objects),
            key_prefix: key_prefix.into(),
            check_object_store,
        }
    }

    /// Gate for runs that never archive.
    pub fn without_archive(store: Arc<dyn FilingStore>) -> Self {
        Self {
            store,
            objects: None,
            key_prefix: String::new(),
            check_object_store: false,
        }
    }

    /// Evaluate a candidate by its item URL.
    ///
    /// The archive is needed only when the store has no archive URL for the
    /// item, no other row was archived under the same key, and (if enabled)
    /// the object store has no object at that key.
    pub async fn check(&self, item_url: &str) -> Result<DedupDecision> {
        let already_stored = self.store.exists_by_item_url(item_url)?;

        let Some(objects) = &self.objects else {
            return Ok(DedupDecision {
                archive: ArchiveAction::Disabled,
                already_stored,
            });
        };

        if let Some(archive_url) = self.store.archive_url_for_item(item_url)? {
            return Ok(DedupDecision {
                archive: ArchiveAction::AlreadyArchived { archive_url },
                already_stored,
            });
        }

        let key = archive_key(&self.key_prefix, item_url);
        let url = objects.url_for(&key);
        if self.store.exists_archive_for_url(&url)? {
            return Ok(DedupDecision {
                archive: ArchiveAction::AlreadyArchived { archive_url: url },
                already_stored,
            });
        }

        if self.check_object_store && objects.head_exists(&key).await? {
            log::debug!("Object {} already present; recording {}", key, url);
            return Ok(DedupDecision {
                archive: ArchiveAction::Backfill { archive_url: url },
                already_stored,
            });
        }

        Ok(DedupDecision {
            archive: ArchiveAction::Needed { key },
            already_stored,
        })
    }
}
