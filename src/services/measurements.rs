// src/services/measurements.rs

//! Record store client for measurement documents and their images.

use chrono::{DateTime, SecondsFormat, Utc};
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;

use crate::context::ServiceContext;
use crate::error::{AppError, Result};
use crate::models::{
    ImageUpload, MEASUREMENTS_COLLECTION, MeasurementDraft, MeasurementImage, MeasurementPatch,
    MeasurementRecord,
};
use crate::storage::{Direction, Document, paths};

/// Field list views are ordered by.
const ORDER_FIELD: &str = "createdAt";

/// Outcome of the best-effort image cleanup during a delete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteReport {
    /// Image deletions attempted
    pub images_attempted: usize,
    /// Image deletions that failed and were skipped
    pub images_failed: usize,
}

/// Service wrapping the `measurements` collection and image storage.
///
/// Image uploads and document writes are independent calls with no shared
/// transaction: a failed write after an upload leaves the blob behind.
#[derive(Clone)]
pub struct MeasurementService {
    ctx: ServiceContext,
}

/// Timestamps are written with fixed nanosecond precision.
fn timestamp(at: DateTime<Utc>) -> Value {
    Value::String(at.to_rfc3339_opts(SecondsFormat::Nanos, true))
}

fn to_document<T: Serialize>(value: &T) -> Result<Document> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(AppError::store_write(format!(
            "expected an object payload, got {}",
            other
        ))),
    }
}

fn from_document(id: String, doc: Document) -> Result<MeasurementRecord> {
    let mut record: MeasurementRecord = serde_json::from_value(Value::Object(doc))
        .map_err(|e| AppError::store_read(format!("malformed measurement {}: {}", id, e)))?;
    record.id = Some(id);
    Ok(record)
}

impl MeasurementService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &ServiceContext {
        &self.ctx
    }

    /// Persist a new record and return its store-assigned id.
    pub async fn create(&self, draft: &MeasurementDraft) -> Result<String> {
        let now = self.ctx.clock.now();
        let mut doc = to_document(draft)?;
        doc.insert("createdAt".into(), timestamp(now));
        doc.insert("updatedAt".into(), timestamp(now));

        let id = self
            .ctx
            .documents
            .add(MEASUREMENTS_COLLECTION, doc)
            .await
            .map_err(AppError::into_write)?;

        log::info!("Created measurement {} ({})", id, draft.title);
        Ok(id)
    }

    /// Merge the provided fields into an existing record.
    pub async fn update(&self, id: &str, patch: &MeasurementPatch) -> Result<()> {
        let mut doc = to_document(patch)?;
        let mut now = self.ctx.clock.now();

        // Keep updatedAt >= createdAt even if the local clock lags the one
        // that created the record.
        if let Some(existing) = self
            .ctx
            .documents
            .get(MEASUREMENTS_COLLECTION, id)
            .await
            .map_err(AppError::into_write)?
        {
            let created = existing
                .get("createdAt")
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|d| d.with_timezone(&Utc));
            if let Some(created) = created {
                now = now.max(created);
            }
        } else {
            return Err(AppError::store_write(format!(
                "measurement {} does not exist",
                id
            )));
        }

        doc.insert("updatedAt".into(), timestamp(now));
        self.ctx
            .documents
            .update(MEASUREMENTS_COLLECTION, id, doc)
            .await
            .map_err(|e| match e {
                AppError::NotFound(_) => {
                    AppError::store_write(format!("measurement {} does not exist", id))
                }
                other => other.into_write(),
            })?;

        log::info!("Updated measurement {}", id);
        Ok(())
    }

    /// Delete a record, cleaning up its images on a best-effort basis.
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.delete_with_report(id).await.map(|_| ())
    }

    /// [`delete`](Self::delete), also reporting how the image cleanup went.
    pub async fn delete_with_report(&self, id: &str) -> Result<DeleteReport> {
        let images = match self.get_by_id(id).await {
            Ok(Some(record)) => record.images,
            Ok(None) => {
                log::warn!("Measurement {} not found; deleting document only", id);
                Vec::new()
            }
            Err(e) => {
                log::warn!("Could not read measurement {} before delete: {}", id, e);
                Vec::new()
            }
        };

        let results = join_all(images.iter().map(|image| self.delete_image(&image.url))).await;
        let mut report = DeleteReport {
            images_attempted: results.len(),
            images_failed: 0,
        };
        for (image, result) in images.iter().zip(results) {
            if let Err(e) = result {
                report.images_failed += 1;
                log::warn!("Error deleting image {}: {}", image.url, e);
            }
        }

        self.ctx
            .documents
            .delete(MEASUREMENTS_COLLECTION, id)
            .await
            .map_err(AppError::into_write)?;

        log::info!(
            "Deleted measurement {} ({} images, {} failed)",
            id,
            report.images_attempted,
            report.images_failed
        );
        Ok(report)
    }

    /// All records, newest first.
    pub async fn get_all(&self) -> Result<Vec<MeasurementRecord>> {
        let docs = self
            .ctx
            .documents
            .list(MEASUREMENTS_COLLECTION, ORDER_FIELD, Direction::Descending)
            .await
            .map_err(AppError::into_read)?;

        docs.into_iter()
            .map(|(id, doc)| from_document(id, doc))
            .collect()
    }

    /// One record, or `None` if it does not exist.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<MeasurementRecord>> {
        let doc = self
            .ctx
            .documents
            .get(MEASUREMENTS_COLLECTION, id)
            .await
            .map_err(AppError::into_read)?;

        doc.map(|doc| from_document(id.to_string(), doc)).transpose()
    }

    /// Store an image under `measurements/{owner_id}/{file name}`.
    ///
    /// Uploads with the same file name under the same owner overwrite each
    /// other.
    pub async fn upload_image(&self, upload: &ImageUpload, owner_id: &str) -> Result<MeasurementImage> {
        let path = paths::image_path(owner_id, &upload.file_name);
        let url = self
            .ctx
            .objects
            .put(&path, upload)
            .await
            .map_err(AppError::into_write)?;

        log::debug!("Uploaded {} via {}", path, self.ctx.objects.backend_tag());
        Ok(MeasurementImage {
            url,
            caption: upload.file_name.clone(),
        })
    }

    /// Delete a stored image; an already-absent image is not an error.
    pub async fn delete_image(&self, url: &str) -> Result<()> {
        match self.ctx.objects.delete_by_url(url).await {
            Ok(()) => Ok(()),
            Err(AppError::NotFound(_)) => {
                log::debug!("Image already absent: {}", url);
                Ok(())
            }
            Err(e) => Err(e.into_write()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeObjectStore, Harness};

    fn aortic_root() -> MeasurementDraft {
        MeasurementDraft {
            title: "Aortic Root".into(),
            category: "Cardiac".into(),
            description: "Diameter at the sinuses of Valsalva".into(),
            normal_value: "<4.0 cm".into(),
            search_terms: vec!["aorta".into(), "root".into()],
            references: vec![],
            images: vec![],
        }
    }

    fn with_title(title: &str) -> MeasurementDraft {
        MeasurementDraft {
            title: title.into(),
            ..aortic_root()
        }
    }

    #[tokio::test]
    async fn test_get_all_empty_collection() {
        let h = Harness::new();
        let service = MeasurementService::new(h.context.clone());

        let all = service.get_all().await.unwrap();
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn test_create_then_get_by_id_roundtrip() {
        let h = Harness::new();
        let service = MeasurementService::new(h.context.clone());
        let mut draft = aortic_root();
        draft.references = vec!["Smith et al. 2020".into()];
        draft.images = vec![MeasurementImage {
            url: "fake://bucket/x.png".into(),
            caption: "axial".into(),
        }];

        let id = service.create(&draft).await.unwrap();
        let record = service.get_by_id(&id).await.unwrap().unwrap();

        assert_eq!(record.id.as_deref(), Some(id.as_str()));
        assert_eq!(record.to_draft(), draft);
        assert_eq!(record.created_at, record.updated_at);
    }

    #[tokio::test]
    async fn test_new_record_is_first_in_listing() {
        let h = Harness::new();
        let service = MeasurementService::new(h.context.clone());

        service.create(&with_title("Spleen Length")).await.unwrap();
        service.create(&with_title("CBD Diameter")).await.unwrap();
        let id = service.create(&aortic_root()).await.unwrap();

        let all = service.get_all().await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].id.as_deref(), Some(id.as_str()));
        assert_eq!(all[0].title, "Aortic Root");
        assert!(all[0].images.is_empty());
        assert_eq!(all[2].title, "Spleen Length");
    }

    #[tokio::test]
    async fn test_get_by_id_missing_is_none() {
        let h = Harness::new();
        let service = MeasurementService::new(h.context.clone());
        assert!(service.get_by_id("does-not-exist").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_merges_and_refreshes_updated_at() {
        let h = Harness::new();
        let service = MeasurementService::new(h.context.clone());
        let id = service.create(&aortic_root()).await.unwrap();
        let before = service.get_by_id(&id).await.unwrap().unwrap();

        let patch = MeasurementPatch {
            normal_value: Some("<3.7 cm".into()),
            ..Default::default()
        };
        service.update(&id, &patch).await.unwrap();

        let after = service.get_by_id(&id).await.unwrap().unwrap();
        assert_eq!(after.normal_value, "<3.7 cm");
        assert_eq!(after.title, before.title);
        assert_eq!(after.created_at, before.created_at);
        assert!(after.updated_at > before.updated_at);
    }

    #[tokio::test]
    async fn test_update_missing_record_is_write_error() {
        let h = Harness::new();
        let service = MeasurementService::new(h.context.clone());

        let err = service
            .update("missing", &MeasurementPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::StoreWrite(_)));
    }

    #[tokio::test]
    async fn test_create_rejected_by_backend() {
        let h = Harness::with_failing_writes();
        let service = MeasurementService::new(h.context.clone());

        let err = service.create(&aortic_root()).await.unwrap_err();
        assert!(matches!(err, AppError::StoreWrite(_)));
    }

    #[tokio::test]
    async fn test_delete_attempts_every_image_even_when_some_fail() {
        let h = Harness::new();
        let service = MeasurementService::new(h.context.clone());

        let mut draft = aortic_root();
        for name in ["a.png", "b.png", "c.png"] {
            let image = service
                .upload_image(&ImageUpload::new(name, vec![1, 2, 3]), "owner")
                .await
                .unwrap();
            draft.images.push(image);
        }
        let id = service.create(&draft).await.unwrap();
        h.objects
            .fail_delete_of(&FakeObjectStore::url("measurements/owner/b.png"))
            .await;

        let report = service.delete_with_report(&id).await.unwrap();

        assert_eq!(report.images_attempted, 3);
        assert_eq!(report.images_failed, 1);
        assert_eq!(
            h.objects.delete_calls.load(std::sync::atomic::Ordering::Relaxed),
            3
        );
        assert!(service.get_by_id(&id).await.unwrap().is_none());
        assert!(!h.objects.contains("measurements/owner/a.png").await);
        assert!(h.objects.contains("measurements/owner/b.png").await);
    }

    #[tokio::test]
    async fn test_delete_missing_record_touches_no_images() {
        let h = Harness::new();
        let service = MeasurementService::new(h.context.clone());

        let report = service.delete_with_report("ghost").await.unwrap();
        assert_eq!(report, DeleteReport::default());
    }

    #[tokio::test]
    async fn test_delete_fails_only_when_document_delete_fails() {
        let h = Harness::with_failing_writes();
        let service = MeasurementService::new(h.context.clone());

        let err = service.delete("anything").await.unwrap_err();
        assert!(matches!(err, AppError::StoreWrite(_)));
    }

    #[tokio::test]
    async fn test_upload_image_path_and_caption() {
        let h = Harness::new();
        let service = MeasurementService::new(h.context.clone());

        let image = service
            .upload_image(&ImageUpload::new("kidney.png", vec![9]), "rec42")
            .await
            .unwrap();
        assert_eq!(image.url, FakeObjectStore::url("measurements/rec42/kidney.png"));
        assert_eq!(image.caption, "kidney.png");
    }

    #[tokio::test]
    async fn test_same_name_uploads_under_one_owner_overwrite() {
        // Known limitation: the path only depends on owner and file name.
        let h = Harness::new();
        let service = MeasurementService::new(h.context.clone());

        let first = service
            .upload_image(&ImageUpload::new("scan.png", vec![1]), "rec1")
            .await
            .unwrap();
        let second = service
            .upload_image(&ImageUpload::new("scan.png", vec![2]), "rec1")
            .await
            .unwrap();

        assert_eq!(first.url, second.url);
        let objects = h.objects.objects.lock().await;
        assert_eq!(objects.len(), 1);
        assert_eq!(objects["measurements/rec1/scan.png"], vec![2]);
    }

    #[tokio::test]
    async fn test_delete_image_already_absent_is_ok() {
        let h = Harness::new();
        let service = MeasurementService::new(h.context.clone());

        service
            .delete_image(&FakeObjectStore::url("measurements/x/gone.png"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_delete_image_backend_error_is_write_error() {
        let h = Harness::new();
        let service = MeasurementService::new(h.context.clone());
        let url = FakeObjectStore::url("measurements/x/locked.png");
        h.objects.fail_delete_of(&url).await;

        let err = service.delete_image(&url).await.unwrap_err();
        assert!(matches!(err, AppError::StoreWrite(_)));
    }
}
