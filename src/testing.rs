//! Test doubles for the storage traits.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::TempDir;
use tokio::sync::Mutex;

use crate::context::{Clock, ServiceContext};
use crate::error::{AppError, Result};
use crate::models::ImageUpload;
use crate::storage::{Direction, Document, DocumentStore, LocalStorage, ObjectStore};

/// Clock that advances one second per reading.
pub struct SteppingClock {
    next: std::sync::Mutex<DateTime<Utc>>,
}

impl SteppingClock {
    pub fn new() -> Self {
        Self {
            next: std::sync::Mutex::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()),
        }
    }
}

impl Clock for SteppingClock {
    fn now(&self) -> DateTime<Utc> {
        let mut next = self.next.lock().unwrap();
        let now = *next;
        *next = now + Duration::seconds(1);
        now
    }
}

/// In-memory object store with per-URL delete failures.
#[derive(Default)]
pub struct FakeObjectStore {
    pub objects: Mutex<HashMap<String, Vec<u8>>>,
    pub failing_urls: Mutex<HashSet<String>>,
    pub fail_puts: bool,
    pub put_calls: AtomicU64,
    pub delete_calls: AtomicU64,
}

impl FakeObjectStore {
    pub fn url(path: &str) -> String {
        format!("fake://bucket/{}", path)
    }

    pub async fn fail_delete_of(&self, url: &str) {
        self.failing_urls.lock().await.insert(url.to_string());
    }

    pub async fn contains(&self, path: &str) -> bool {
        self.objects.lock().await.contains_key(path)
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    fn backend_tag(&self) -> &'static str {
        "fake"
    }

    async fn put(&self, path: &str, upload: &ImageUpload) -> Result<String> {
        self.put_calls.fetch_add(1, Ordering::Relaxed);
        if self.fail_puts {
            return Err(AppError::store_write("upload rejected"));
        }
        self.objects
            .lock()
            .await
            .insert(path.to_string(), upload.bytes.clone());
        Ok(Self::url(path))
    }

    async fn delete_by_url(&self, url: &str) -> Result<()> {
        self.delete_calls.fetch_add(1, Ordering::Relaxed);
        if self.failing_urls.lock().await.contains(url) {
            return Err(AppError::store_write("permission denied"));
        }
        let path = url
            .strip_prefix("fake://bucket/")
            .ok_or_else(|| AppError::store_write("foreign URL"))?;
        match self.objects.lock().await.remove(path) {
            Some(_) => Ok(()),
            None => Err(AppError::not_found(url)),
        }
    }
}

/// Document store wrapper that counts writes and can reject them.
pub struct CountingDocumentStore {
    pub inner: LocalStorage,
    pub fail_writes: bool,
    pub writes: AtomicU64,
}

impl CountingDocumentStore {
    pub fn new(inner: LocalStorage) -> Self {
        Self {
            inner,
            fail_writes: false,
            writes: AtomicU64::new(0),
        }
    }

    fn write_attempt(&self) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        if self.fail_writes {
            Err(AppError::store_write("permission denied"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DocumentStore for CountingDocumentStore {
    fn backend_tag(&self) -> &'static str {
        "counting"
    }

    async fn add(&self, collection: &str, fields: Document) -> Result<String> {
        self.write_attempt()?;
        self.inner.add(collection, fields).await
    }

    async fn set(&self, collection: &str, id: &str, fields: Document) -> Result<()> {
        self.write_attempt()?;
        self.inner.set(collection, id, fields).await
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        self.inner.get(collection, id).await
    }

    async fn list(
        &self,
        collection: &str,
        order_by: &str,
        direction: Direction,
    ) -> Result<Vec<(String, Document)>> {
        self.inner.list(collection, order_by, direction).await
    }

    async fn update(&self, collection: &str, id: &str, fields: Document) -> Result<()> {
        self.write_attempt()?;
        self.inner.update(collection, id, fields).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        self.write_attempt()?;
        self.inner.delete(collection, id).await
    }
}

/// A context over a temp-dir document store and an in-memory object store.
pub struct Harness {
    pub _tmp: TempDir,
    pub documents: Arc<CountingDocumentStore>,
    pub objects: Arc<FakeObjectStore>,
    pub context: ServiceContext,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(false, FakeObjectStore::default())
    }

    pub fn with_failing_writes() -> Self {
        Self::build(true, FakeObjectStore::default())
    }

    pub fn with_failing_uploads() -> Self {
        Self::build(
            false,
            FakeObjectStore {
                fail_puts: true,
                ..Default::default()
            },
        )
    }

    fn build(fail_writes: bool, objects: FakeObjectStore) -> Self {
        let tmp = TempDir::new().unwrap();
        let mut documents = CountingDocumentStore::new(LocalStorage::new(tmp.path()));
        documents.fail_writes = fail_writes;
        let documents = Arc::new(documents);
        let objects = Arc::new(objects);
        let context = ServiceContext::new(documents.clone(), objects.clone())
            .with_clock(Arc::new(SteppingClock::new()));
        Self {
            _tmp: tmp,
            documents,
            objects,
            context,
        }
    }

    pub fn writes(&self) -> u64 {
        self.documents.writes.load(Ordering::Relaxed)
    }
}
