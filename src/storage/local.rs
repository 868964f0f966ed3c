//! Local filesystem storage implementation.
//!
//! Backs both [`DocumentStore`] and [`ObjectStore`] with plain files for
//! development and testing. Production deployments use the managed
//! backend adapters.
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//! ├── db/
//! │   ├── measurements/{id}.json
//! │   └── users/{uid}.json
//! └── objects/
//!     └── measurements/{ownerId}/{fileName}
//! ```
//!
//! Object URLs are `file://` URLs of the absolute blob path.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::ImageUpload;
use crate::storage::{Direction, Document, DocumentStore, ObjectStore, paths};

/// Length of generated document ids.
const ID_LEN: usize = 20;

/// Local filesystem storage backend.
#[derive(Clone)]
pub struct LocalStorage {
    root_dir: PathBuf,
    id_counter: Arc<AtomicU64>,
    write_lock: Arc<Mutex<()>>,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            id_counter: Arc::new(AtomicU64::new(0)),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Get the full path for a relative key.
    fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    fn objects_dir(&self) -> PathBuf {
        self.root_dir.join("objects")
    }

    /// Key of a document file, or `None` for ids that cannot name a file.
    fn doc_key(collection: &str, id: &str) -> Option<String> {
        let key = format!("db/{}/{}.json", collection, id);
        (paths::is_safe(collection) && !collection.contains('/') && paths::is_safe(id)
            && !id.contains('/'))
        .then_some(key)
    }

    /// Generate a document id that does not collide within this process.
    fn generate_id(&self, collection: &str) -> String {
        let seq = self.id_counter.fetch_add(1, AtomicOrdering::Relaxed);
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(collection.as_bytes());
        hasher.update(nanos.to_le_bytes());
        hasher.update(seq.to_le_bytes());
        hasher.update(std::process::id().to_le_bytes());
        let mut id = hex::encode(hasher.finalize());
        id.truncate(ID_LEN);
        id
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes_at(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        self.ensure_dir(path).await?;

        // One tmp file per writer; concurrent writes to a path race on the
        // rename only, and the last one wins.
        let seq = self.id_counter.fetch_add(1, AtomicOrdering::Relaxed);
        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(format!(".{}.{}.tmp", std::process::id(), seq));
        let tmp = PathBuf::from(tmp_name);

        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Write JSON data.
    async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_bytes_at(&self.path(key), &bytes).await
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Read JSON data.
    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.read_bytes(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Absolute blob path for an object path.
    fn object_file(&self, path: &str) -> Result<PathBuf> {
        if !paths::is_safe(path) {
            return Err(AppError::store_write(format!("invalid object path '{}'", path)));
        }
        Ok(std::path::absolute(self.objects_dir().join(path))?)
    }

    /// Map an object URL back onto a blob inside the objects directory.
    fn file_for_url(&self, url: &str) -> Result<PathBuf> {
        let parsed = Url::parse(url)?;
        let file = parsed
            .to_file_path()
            .map_err(|_| AppError::store_write(format!("not a local object URL: {}", url)))?;
        let objects = std::path::absolute(self.objects_dir())?;
        if !file.starts_with(&objects) {
            return Err(AppError::store_write(format!(
                "object URL outside storage root: {}",
                url
            )));
        }
        Ok(file)
    }
}

/// Order two field values; timestamps compare chronologically, then
/// numbers, then strings. Missing values sort first.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Value::String(x)), Some(Value::String(y))) => {
            match (
                DateTime::parse_from_rfc3339(x),
                DateTime::parse_from_rfc3339(y),
            ) {
                (Ok(dx), Ok(dy)) => dx.cmp(&dy),
                _ => x.cmp(y),
            }
        }
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

#[async_trait]
impl DocumentStore for LocalStorage {
    fn backend_tag(&self) -> &'static str {
        "local"
    }

    async fn add(&self, collection: &str, fields: Document) -> Result<String> {
        let _guard = self.write_lock.lock().await;
        let id = self.generate_id(collection);
        let key = Self::doc_key(collection, &id)
            .ok_or_else(|| AppError::store_write(format!("invalid collection '{}'", collection)))?;
        self.write_json(&key, &fields).await?;
        log::debug!("Added {}/{}", collection, id);
        Ok(id)
    }

    async fn set(&self, collection: &str, id: &str, fields: Document) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let key = Self::doc_key(collection, id).ok_or_else(|| {
            AppError::store_write(format!("invalid document id '{}/{}'", collection, id))
        })?;
        self.write_json(&key, &fields).await
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        match Self::doc_key(collection, id) {
            Some(key) => self.read_json(&key).await,
            None => Ok(None),
        }
    }

    async fn list(
        &self,
        collection: &str,
        order_by: &str,
        direction: Direction,
    ) -> Result<Vec<(String, Document)>> {
        let dir = self.path(&format!("db/{}", collection));
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AppError::Io(e)),
        };

        let mut docs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let bytes = tokio::fs::read(&path).await?;
            let doc: Document = serde_json::from_slice(&bytes)?;
            docs.push((id.to_string(), doc));
        }

        docs.sort_by(|(id_a, a), (id_b, b)| {
            let ord = compare_values(a.get(order_by), b.get(order_by)).then_with(|| id_a.cmp(id_b));
            match direction {
                Direction::Ascending => ord,
                Direction::Descending => ord.reverse(),
            }
        });
        Ok(docs)
    }

    async fn update(&self, collection: &str, id: &str, fields: Document) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let key = Self::doc_key(collection, id)
            .ok_or_else(|| AppError::not_found(format!("{}/{}", collection, id)))?;
        let mut existing: Document = self
            .read_json(&key)
            .await?
            .ok_or_else(|| AppError::not_found(format!("{}/{}", collection, id)))?;

        for (field, value) in fields {
            existing.insert(field, value);
        }
        self.write_json(&key, &existing).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let Some(key) = Self::doc_key(collection, id) else {
            return Ok(());
        };
        match tokio::fs::remove_file(self.path(&key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Io(e)),
        }
    }
}

#[async_trait]
impl ObjectStore for LocalStorage {
    fn backend_tag(&self) -> &'static str {
        "local"
    }

    async fn put(&self, path: &str, upload: &ImageUpload) -> Result<String> {
        let file = self.object_file(path)?;
        self.write_bytes_at(&file, &upload.bytes).await?;
        let url = Url::from_file_path(&file)
            .map_err(|_| AppError::store_write(format!("cannot build URL for {:?}", file)))?;
        log::debug!("Stored {} bytes at {}", upload.bytes.len(), url);
        Ok(url.to_string())
    }

    async fn delete_by_url(&self, url: &str) -> Result<()> {
        let file = self.file_for_url(url)?;
        match tokio::fs::remove_file(&file).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(AppError::not_found(url)),
            Err(e) => Err(AppError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_add_and_get() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        let id = storage
            .add("measurements", doc(json!({"title": "Spleen length"})))
            .await
            .unwrap();
        assert_eq!(id.len(), ID_LEN);

        let loaded = storage.get("measurements", &id).await.unwrap().unwrap();
        assert_eq!(loaded["title"], "Spleen length");
    }

    #[tokio::test]
    async fn test_get_missing_and_invalid_ids() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        assert!(storage.get("measurements", "nope").await.unwrap().is_none());
        assert!(storage.get("measurements", "../x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_empty_collection() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        let docs = storage
            .list("measurements", "createdAt", Direction::Descending)
            .await
            .unwrap();
        assert!(docs.is_empty());
    }

    #[tokio::test]
    async fn test_list_orders_timestamps_chronologically() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        // Differing fractional precision must not break ordering.
        for (title, ts) in [
            ("old", "2026-01-01T00:00:00Z"),
            ("new", "2026-01-01T00:00:00.5Z"),
            ("mid", "2026-01-01T00:00:00.000000001Z"),
        ] {
            storage
                .add("measurements", doc(json!({"title": title, "createdAt": ts})))
                .await
                .unwrap();
        }

        let docs = storage
            .list("measurements", "createdAt", Direction::Descending)
            .await
            .unwrap();
        let titles: Vec<_> = docs.iter().map(|(_, d)| d["title"].clone()).collect();
        assert_eq!(titles, vec![json!("new"), json!("mid"), json!("old")]);
    }

    #[tokio::test]
    async fn test_update_merges_and_requires_existing() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        let id = storage
            .add("measurements", doc(json!({"title": "A", "category": "Neuro"})))
            .await
            .unwrap();
        storage
            .update("measurements", &id, doc(json!({"title": "B"})))
            .await
            .unwrap();

        let loaded = storage.get("measurements", &id).await.unwrap().unwrap();
        assert_eq!(loaded["title"], "B");
        assert_eq!(loaded["category"], "Neuro");

        let err = storage
            .update("measurements", "missing", doc(json!({"title": "C"})))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        let id = storage.add("users", doc(json!({}))).await.unwrap();
        storage.delete("users", &id).await.unwrap();
        storage.delete("users", &id).await.unwrap();
        assert!(storage.get("users", &id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_object_put_and_delete_by_url() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let upload = ImageUpload::new("liver.png", b"png".to_vec());

        let url = storage
            .put("measurements/abc/liver.png", &upload)
            .await
            .unwrap();
        assert!(url.starts_with("file://"));
        assert!(tmp.path().join("objects/measurements/abc/liver.png").exists());

        storage.delete_by_url(&url).await.unwrap();
        let err = storage.delete_by_url(&url).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_puts_to_one_path_overwrite() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let path = "measurements/owner/scan.png";
        let a = ImageUpload::new("scan.png", vec![1; 4096]);
        let b = ImageUpload::new("scan.png", vec![2; 4096]);

        for _ in 0..100 {
            let (ra, rb) = tokio::join!(storage.put(path, &a), storage.put(path, &b));
            assert_eq!(ra.unwrap(), rb.unwrap());
        }

        let stored = std::fs::read(tmp.path().join("objects").join(path)).unwrap();
        assert!(stored == a.bytes || stored == b.bytes);

        let leftovers: Vec<_> = std::fs::read_dir(tmp.path().join("objects/measurements/owner"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers.len(), 1, "{:?}", leftovers);
    }

    #[tokio::test]
    async fn test_delete_by_url_rejects_foreign_paths() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        assert!(storage.delete_by_url("file:///etc/hosts").await.is_err());
        assert!(storage.delete_by_url("https://example.com/x.png").await.is_err());
    }
}
