// src/form.rs

//! Admin form controller for creating and editing measurements.
//!
//! A submission runs `Idle → Validating → Submitting → Success | Failed`.
//! Saving is a two-step saga over independent services:
//!
//! 1. upload every newly added image (in parallel)
//! 2. create or update the record document
//!
//! There is no rollback. If step 2 fails, the blobs from step 1 stay in
//! object storage. Images of a record that does not exist yet are uploaded
//! under a timestamp placeholder owner id, so they never share a path
//! prefix with the record id that is assigned afterwards.

use std::fmt;
use std::sync::Arc;

use futures::future::try_join_all;

use crate::error::{Result, ValidationErrors};
use crate::models::{
    ImageUpload, MeasurementDraft, MeasurementImage, MeasurementPatch, MeasurementRecord,
};
use crate::services::MeasurementService;

/// User-facing message for any failed save.
pub const SAVE_FAILED: &str = "Failed to save measurement";

/// Split a comma-separated input into trimmed segments.
///
/// Empty segments are kept: `"a, ,b,"` gives `["a", "", "b", ""]`.
pub fn parse_comma_list(text: &str) -> Vec<String> {
    text.split(',').map(|s| s.trim().to_string()).collect()
}

/// Raw field values of the form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormInput {
    pub title: String,
    pub category: String,
    pub description: String,
    pub normal_value: String,
    pub search_terms: Vec<String>,
    pub references: Vec<String>,
}

impl FormInput {
    /// Replace search terms from comma-separated text.
    pub fn set_search_terms_text(&mut self, text: &str) {
        self.search_terms = parse_comma_list(text);
    }

    /// Replace references from comma-separated text.
    pub fn set_references_text(&mut self, text: &str) {
        self.references = parse_comma_list(text);
    }

    pub fn search_terms_text(&self) -> String {
        self.search_terms.join(", ")
    }

    pub fn references_text(&self) -> String {
        self.references.join(", ")
    }

    /// Check that every required field is non-empty.
    pub fn validate(&self) -> Result<()> {
        let mut errors = ValidationErrors::new();
        let required = [
            ("title", &self.title, "Title is required"),
            ("category", &self.category, "Category is required"),
            ("description", &self.description, "Description is required"),
            ("normalValue", &self.normal_value, "Normal value is required"),
        ];
        for (field, value, message) in required {
            if value.is_empty() {
                errors.push(field, message);
            }
        }
        errors.into_result()
    }
}

/// One entry of the image working set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageDraft {
    /// Already stored; has a durable URL
    Persisted(MeasurementImage),
    /// Selected locally; uploaded on submit
    Pending { caption: String, upload: ImageUpload },
}

impl ImageDraft {
    pub fn caption(&self) -> &str {
        match self {
            ImageDraft::Persisted(image) => &image.caption,
            ImageDraft::Pending { caption, .. } => caption,
        }
    }

    fn set_caption(&mut self, new_caption: String) {
        match self {
            ImageDraft::Persisted(image) => image.caption = new_caption,
            ImageDraft::Pending { caption, .. } => *caption = new_caption,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ImageDraft::Pending { .. })
    }
}

/// Submission state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormState {
    Idle,
    Validating,
    Submitting,
    Success { id: String, created: bool },
    Failed { message: String },
}

impl fmt::Display for FormState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormState::Idle => write!(f, "idle"),
            FormState::Validating => write!(f, "validating"),
            FormState::Submitting => write!(f, "submitting"),
            FormState::Success { id, created: true } => write!(f, "created {}", id),
            FormState::Success { id, created: false } => write!(f, "updated {}", id),
            FormState::Failed { message } => write!(f, "failed: {}", message),
        }
    }
}

/// Receives every state transition of a form.
pub trait FormObserver: Send + Sync {
    fn on_transition(&self, from: &FormState, to: &FormState);
}

/// Result of a successful submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub id: String,
    pub created: bool,
    pub images: Vec<MeasurementImage>,
}

/// Controller behind the add/edit measurement dialog.
pub struct MeasurementForm {
    service: MeasurementService,
    record_id: Option<String>,
    pub input: FormInput,
    images: Vec<ImageDraft>,
    state: FormState,
    observers: Vec<Arc<dyn FormObserver>>,
}

impl MeasurementForm {
    /// Empty form for a new record.
    pub fn new(service: MeasurementService) -> Self {
        Self {
            service,
            record_id: None,
            input: FormInput::default(),
            images: Vec::new(),
            state: FormState::Idle,
            observers: Vec::new(),
        }
    }

    /// Form pre-filled from an existing record.
    pub fn for_record(service: MeasurementService, record: &MeasurementRecord) -> Self {
        let mut form = Self::new(service);
        form.record_id = record.id.clone();
        form.input = FormInput {
            title: record.title.clone(),
            category: record.category.clone(),
            description: record.description.clone(),
            normal_value: record.normal_value.clone(),
            search_terms: record.search_terms.clone(),
            references: record.references.clone(),
        };
        form.images = record
            .images
            .iter()
            .cloned()
            .map(ImageDraft::Persisted)
            .collect();
        form
    }

    pub fn record_id(&self) -> Option<&str> {
        self.record_id.as_deref()
    }

    pub fn is_editing(&self) -> bool {
        self.record_id.is_some()
    }

    pub fn state(&self) -> &FormState {
        &self.state
    }

    /// Whether the submit control should be disabled.
    pub fn is_submitting(&self) -> bool {
        self.state == FormState::Submitting
    }

    pub fn observe(&mut self, observer: Arc<dyn FormObserver>) {
        self.observers.push(observer);
    }

    pub fn images(&self) -> &[ImageDraft] {
        &self.images
    }

    /// Queue a local file; its caption starts as the file name.
    pub fn add_upload(&mut self, upload: ImageUpload) {
        self.images.push(ImageDraft::Pending {
            caption: upload.file_name.clone(),
            upload,
        });
    }

    /// Drop an image from the working set. Stored blobs are left alone.
    pub fn remove_image(&mut self, index: usize) -> Option<ImageDraft> {
        (index < self.images.len()).then(|| self.images.remove(index))
    }

    pub fn set_caption(&mut self, index: usize, caption: impl Into<String>) -> bool {
        match self.images.get_mut(index) {
            Some(image) => {
                image.set_caption(caption.into());
                true
            }
            None => false,
        }
    }

    fn transition(&mut self, to: FormState) {
        if self.state == to {
            return;
        }
        let from = std::mem::replace(&mut self.state, to);
        log::debug!("Form state: {} -> {}", from, self.state);
        for observer in &self.observers {
            observer.on_transition(&from, &self.state);
        }
    }

    /// Validate, upload new images, then create or update the record.
    pub async fn submit(&mut self) -> Result<SubmitOutcome> {
        self.transition(FormState::Idle);
        self.transition(FormState::Validating);

        if let Err(e) = self.input.validate() {
            log::info!("Form rejected: {}", e);
            self.transition(FormState::Idle);
            return Err(e);
        }

        self.transition(FormState::Submitting);
        match self.save().await {
            Ok(outcome) => {
                self.record_id = Some(outcome.id.clone());
                self.images = outcome
                    .images
                    .iter()
                    .cloned()
                    .map(ImageDraft::Persisted)
                    .collect();
                self.transition(FormState::Success {
                    id: outcome.id.clone(),
                    created: outcome.created,
                });
                Ok(outcome)
            }
            Err(e) => {
                log::error!("Saving measurement failed: {}", e);
                self.transition(FormState::Failed {
                    message: SAVE_FAILED.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Upload pending images, then write the record.
    async fn save(&self) -> Result<SubmitOutcome> {
        let owner_id = match &self.record_id {
            Some(id) => id.clone(),
            None => self.service.context().clock.now().timestamp_millis().to_string(),
        };

        let existing: Vec<MeasurementImage> = self
            .images
            .iter()
            .filter_map(|image| match image {
                ImageDraft::Persisted(image) => Some(image.clone()),
                ImageDraft::Pending { .. } => None,
            })
            .collect();

        let uploads = self.images.iter().filter_map(|image| match image {
            ImageDraft::Pending { caption, upload } => Some((caption, upload)),
            ImageDraft::Persisted(_) => None,
        });
        let uploaded = try_join_all(uploads.map(|(caption, upload)| {
            let owner_id = owner_id.as_str();
            async move {
                let mut image = self.service.upload_image(upload, owner_id).await?;
                image.caption = caption.clone();
                Ok::<_, crate::error::AppError>(image)
            }
        }))
        .await?;

        if !uploaded.is_empty() {
            log::info!("Uploaded {} image(s) under {}", uploaded.len(), owner_id);
        }

        let images: Vec<MeasurementImage> = existing.into_iter().chain(uploaded).collect();
        let draft = MeasurementDraft {
            title: self.input.title.clone(),
            category: self.input.category.clone(),
            description: self.input.description.clone(),
            normal_value: self.input.normal_value.clone(),
            search_terms: self.input.search_terms.clone(),
            references: self.input.references.clone(),
            images: images.clone(),
        };

        let (id, created) = match &self.record_id {
            Some(id) => {
                self.service
                    .update(id, &MeasurementPatch::from(draft))
                    .await?;
                (id.clone(), false)
            }
            None => (self.service.create(&draft).await?, true),
        };

        Ok(SubmitOutcome {
            id,
            created,
            images,
        })
    }
}
