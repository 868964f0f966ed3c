//! Storage abstractions for measurement documents and image blobs.
//!
//! Two narrow contracts sit in front of the external backend:
//! - [`DocumentStore`]: keyed JSON documents grouped in collections
//! - [`ObjectStore`]: binary objects addressed by path, resolvable by URL
//!
//! ## Layout
//!
//! ```text
//! measurements/{id}                     # MeasurementRecord documents
//! users/{uid}                           # { "isAdmin": true }
//! objects: measurements/{ownerId}/{fileName}
//! ```
//!
//! Neither contract offers transactions. Writing a document and uploading
//! blobs are separate calls, and callers treat them as separate steps.

pub mod firebase_storage;
pub mod firestore;
pub mod local;
#[cfg(feature = "s3")]
pub mod s3;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::models::ImageUpload;

// Re-export for convenience
pub use firebase_storage::FirebaseStorage;
pub use firestore::FirestoreStore;
pub use local::LocalStorage;
#[cfg(feature = "s3")]
pub use s3::S3ObjectStore;

/// Field map of a stored document (the id is not part of it).
pub type Document = Map<String, Value>;

/// Sort direction for ordered listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// Trait for document database backends.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Short backend name for logs.
    fn backend_tag(&self) -> &'static str;

    /// Insert a document under a store-generated id and return that id.
    async fn add(&self, collection: &str, fields: Document) -> Result<String>;

    /// Create or replace a document under a caller-chosen id.
    async fn set(&self, collection: &str, id: &str, fields: Document) -> Result<()>;

    /// Fetch a document; `Ok(None)` when it does not exist.
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>>;

    /// All documents of a collection ordered by one field.
    async fn list(
        &self,
        collection: &str,
        order_by: &str,
        direction: Direction,
    ) -> Result<Vec<(String, Document)>>;

    /// Merge `fields` into an existing document.
    ///
    /// Fails with [`AppError::NotFound`](crate::error::AppError::NotFound)
    /// if the document does not exist.
    async fn update(&self, collection: &str, id: &str, fields: Document) -> Result<()>;

    /// Delete a document. Deleting a missing document is not an error.
    async fn delete(&self, collection: &str, id: &str) -> Result<()>;
}

/// Trait for binary object storage backends.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short backend name for logs.
    fn backend_tag(&self) -> &'static str;

    /// Store bytes at `path`, overwriting any existing object, and return
    /// a resolvable URL for it.
    async fn put(&self, path: &str, upload: &ImageUpload) -> Result<String>;

    /// Delete the object a URL returned by [`ObjectStore::put`] points at.
    ///
    /// Fails with [`AppError::NotFound`](crate::error::AppError::NotFound)
    /// when the object is already absent.
    async fn delete_by_url(&self, url: &str) -> Result<()>;
}

/// Object path helpers.
pub mod paths {
    /// Storage path of an uploaded image: `measurements/{ownerId}/{fileName}`.
    pub fn image_path(owner_id: &str, file_name: &str) -> String {
        format!("measurements/{}/{}", owner_id, file_name)
    }

    /// Whether a relative path is safe to map onto a directory tree.
    pub fn is_safe(path: &str) -> bool {
        !path.is_empty()
            && !path.starts_with('/')
            && path
                .split('/')
                .all(|seg| !seg.is_empty() && seg != "." && seg != ".." && !seg.contains('\\'))
    }
}
