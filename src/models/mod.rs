// src/models/mod.rs

//! Domain models for the measurement store.
//!
//! This module contains the data structures shared by the store client,
//! the admin form and the views, organized by their primary purpose.

mod config;
mod measurement;

// Re-export all public types
pub use config::{
    Backend, Config, FirebaseConfig, LoggingConfig, ObjectBackend, S3Config, SearchConfig,
    StorageConfig,
};
pub use measurement::{
    ImageUpload, MeasurementDraft, MeasurementImage, MeasurementPatch, MeasurementRecord,
    guess_content_type,
};

/// Collection holding measurement documents.
pub const MEASUREMENTS_COLLECTION: &str = "measurements";

/// Collection holding per-user privilege documents.
pub const USERS_COLLECTION: &str = "users";
