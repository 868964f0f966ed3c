// src/error.rs

//! Unified error handling for the measurement store.

use std::fmt;

use thiserror::Error;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Generic message surfaced for every sign-in failure.
pub const INVALID_CREDENTIALS: &str = "Invalid email or password";

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

/// Field-level validation failures collected from a form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<FieldError>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.push(FieldError {
            field,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Message for a field, if that field failed.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|e| e.field == field)
            .map(|e| e.message.as_str())
    }

    /// Convert into `Err` when any field failed.
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// Client-side form validation failed; nothing was submitted
    #[error("Validation error: {0}")]
    Validation(ValidationErrors),

    /// Create/update/delete rejected by the backend
    #[error("Store write error: {0}")]
    StoreWrite(String),

    /// List/detail load failed
    #[error("Store read error: {0}")]
    StoreRead(String),

    /// Sign-in failed
    #[error("Auth error: {0}")]
    Auth(String),

    /// Document or object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    /// Create a single-field validation error.
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        let mut errors = ValidationErrors::new();
        errors.push(field, message);
        Self::Validation(errors)
    }

    /// Create a store write error.
    pub fn store_write(message: impl fmt::Display) -> Self {
        Self::StoreWrite(message.to_string())
    }

    /// Create a store read error.
    pub fn store_read(message: impl fmt::Display) -> Self {
        Self::StoreRead(message.to_string())
    }

    /// The generic sign-in failure.
    pub fn invalid_credentials() -> Self {
        Self::Auth(INVALID_CREDENTIALS.to_string())
    }

    /// Create a not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Re-tag a backend failure as a write failure, keeping validation and
    /// write errors as they are.
    pub fn into_write(self) -> Self {
        match self {
            e @ (Self::Validation(_) | Self::StoreWrite(_)) => e,
            other => Self::StoreWrite(other.to_string()),
        }
    }

    /// Re-tag a backend failure as a read failure.
    pub fn into_read(self) -> Self {
        match self {
            e @ Self::StoreRead(_) => e,
            other => Self::StoreRead(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_lookup_by_field() {
        let mut errors = ValidationErrors::new();
        errors.push("title", "Title is required");
        errors.push("category", "Category is required");

        assert_eq!(errors.get("title"), Some("Title is required"));
        assert_eq!(errors.get("description"), None);
        assert!(matches!(errors.into_result(), Err(AppError::Validation(_))));
    }

    #[test]
    fn empty_validation_is_ok() {
        assert!(ValidationErrors::new().into_result().is_ok());
    }

    #[test]
    fn into_write_wraps_backend_errors() {
        let err = AppError::not_found("measurements/abc").into_write();
        assert!(matches!(err, AppError::StoreWrite(ref m) if m.contains("abc")));

        let err = AppError::store_write("denied").into_write();
        assert!(matches!(err, AppError::StoreWrite(ref m) if m == "denied"));
    }

    #[test]
    fn invalid_credentials_is_generic() {
        let err = AppError::invalid_credentials();
        assert_eq!(err.to_string(), format!("Auth error: {}", INVALID_CREDENTIALS));
    }
}
