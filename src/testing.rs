//! In-process fakes for the network, object storage and filing store.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::{AppError, Result};
use crate::models::Filing;
use crate::storage::{FilingStore, ObjectStore, SqliteFilingStore};
use crate::utils::http::SourceClient;
use crate::utils::object_url;

/// Serves canned bodies by URL; unknown URLs fail like a 404.
#[derive(Default)]
pub struct FakeSource {
    bodies: HashMap<String, Vec<u8>>,
    requests: Mutex<Vec<String>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_body(mut self, url: &str, body: Vec<u8>) -> Self {
        self.bodies.insert(url.to_string(), body);
        self
    }

    pub fn with_text(self, url: &str, body: &str) -> Self {
        self.with_body(url, body.as_bytes().to_vec())
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests.lock().unwrap().iter().filter(|u| *u == url).count()
    }
}

#[async_trait]
impl SourceClient for FakeSource {
    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        self.requests.lock().unwrap().push(url.to_string());
        self.bodies
            .get(url)
            .cloned()
            .ok_or_else(|| AppError::transport(url, "HTTP status 404 Not Found"))
    }
}

/// Object store held in memory, recording every put.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    puts: Mutex<Vec<String>>,
    failing_keys: HashSet<String>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed an object, as if archived by an earlier run.
    pub fn with_object(self, key: &str, bytes: &[u8]) -> Self {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), bytes.to_vec());
        self
    }

    /// Make every put to `key` fail.
    pub fn failing_on(mut self, key: &str) -> Self {
        self.failing_keys.insert(key.to_string());
        self
    }

    /// Keys passed to `put`, in call order.
    pub fn puts(&self) -> Vec<String> {
        self.puts.lock().unwrap().clone()
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn url_for(&self, key: &str) -> String {
        object_url("https://bucket.test", key)
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> Result<String> {
        self.puts.lock().unwrap().push(key.to_string());
        if self.failing_keys.contains(key) {
            return Err(AppError::object_store(format!("put {key}: access denied")));
        }
        self.objects.lock().unwrap().insert(key.to_string(), bytes);
        Ok(self.url_for(key))
    }

    async fn head_exists(&self, key: &str) -> Result<bool> {
        Ok(self.objects.lock().unwrap().contains_key(key))
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.object(key))
    }
}

/// In-memory SQLite store that records upserts and can be made to fail them.
pub struct RecordingStore {
    inner: SqliteFilingStore,
    upserts: Mutex<Vec<String>>,
    fail_upserts: bool,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self {
            inner: SqliteFilingStore::open_in_memory().unwrap(),
            upserts: Mutex::new(Vec::new()),
            fail_upserts: false,
        }
    }

    /// Store whose every upsert fails.
    pub fn failing() -> Self {
        Self {
            fail_upserts: true,
            ..Self::new()
        }
    }

    /// Item URLs passed to `upsert`, in call order.
    pub fn upserts(&self) -> Vec<String> {
        self.upserts.lock().unwrap().clone()
    }

    pub fn clear_upserts(&self) {
        self.upserts.lock().unwrap().clear();
    }
}

impl FilingStore for RecordingStore {
    fn upsert(&self, filing: &Filing) -> Result<()> {
        self.upserts.lock().unwrap().push(filing.item_url.clone());
        if self.fail_upserts {
            return Err(AppError::store("disk I/O error"));
        }
        self.inner.upsert(filing)
    }

    fn exists_by_item_url(&self, item_url: &str) -> Result<bool> {
        self.inner.exists_by_item_url(item_url)
    }

    fn exists_archive_for_url(&self, archive_url: &str) -> Result<bool> {
        self.inner.exists_archive_for_url(archive_url)
    }

    fn archive_url_for_item(&self, item_url: &str) -> Result<Option<String>> {
        self.inner.archive_url_for_item(item_url)
    }

    fn get(&self, item_url: &str) -> Result<Option<Filing>> {
        self.inner.get(item_url)
    }

    fn query_by_date(&self, date: NaiveDate) -> Result<Vec<Filing>> {
        self.inner.query_by_date(date)
    }

    fn count(&self) -> Result<usize> {
        self.inner.count()
    }

    fn latest(&self) -> Result<Option<Filing>> {
        self.inner.latest()
    }
}
