//! Measurement record data structures.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A stored image attached to a measurement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MeasurementImage {
    /// Resolvable address of the stored binary
    pub url: String,

    /// Display label (defaults to the uploaded file name)
    pub caption: String,
}

/// A radiology measurement as stored in the `measurements` collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementRecord {
    /// Store-assigned document id; `None` until first persisted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub title: String,
    pub category: String,
    pub description: String,
    pub normal_value: String,

    #[serde(default)]
    pub search_terms: Vec<String>,

    #[serde(default)]
    pub references: Vec<String>,

    /// Display order; index 0 is the cover image
    #[serde(default)]
    pub images: Vec<MeasurementImage>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MeasurementRecord {
    /// The first image, shown in list views.
    pub fn cover(&self) -> Option<&MeasurementImage> {
        self.images.first()
    }

    /// Whether this record has been written to the store.
    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    /// Editable fields of this record.
    pub fn to_draft(&self) -> MeasurementDraft {
        MeasurementDraft {
            title: self.title.clone(),
            category: self.category.clone(),
            description: self.description.clone(),
            normal_value: self.normal_value.clone(),
            search_terms: self.search_terms.clone(),
            references: self.references.clone(),
            images: self.images.clone(),
        }
    }
}

/// Editable payload of a measurement (everything but id and timestamps).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementDraft {
    pub title: String,
    pub category: String,
    pub description: String,
    pub normal_value: String,
    #[serde(default)]
    pub search_terms: Vec<String>,
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub images: Vec<MeasurementImage>,
}

/// Partial update; only `Some` fields are merged into the stored document.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normal_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_terms: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub references: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<MeasurementImage>>,
}

impl From<MeasurementDraft> for MeasurementPatch {
    fn from(draft: MeasurementDraft) -> Self {
        Self {
            title: Some(draft.title),
            category: Some(draft.category),
            description: Some(draft.description),
            normal_value: Some(draft.normal_value),
            search_terms: Some(draft.search_terms),
            references: Some(draft.references),
            images: Some(draft.images),
        }
    }
}

/// A local file selected for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let file_name = file_name.into();
        Self {
            content_type: guess_content_type(&file_name).to_string(),
            file_name,
            bytes,
        }
    }

    /// Read an upload from disk, naming it after the file.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        Ok(Self::new(file_name, bytes))
    }
}

/// MIME type from a file extension.
pub fn guess_content_type(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "dcm" => "application/dicom",
        _ => "application/octet-stream",
    }
}
