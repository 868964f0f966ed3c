//! Email/password authentication and the signed-in session.
//!
//! - [`LocalAuth`]: accounts file next to the local document store
//! - [`IdentityToolkitAuth`]: the managed identity provider over REST
//!
//! Every provider failure surfaces as the same
//! [`AppError::Auth`] message, so a caller cannot tell an unknown account
//! from a wrong password.

pub mod identity_toolkit;
pub mod local;

use std::path::Path;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result, ValidationErrors};

pub use identity_toolkit::IdentityToolkitAuth;
pub use local::LocalAuth;

/// Minimum accepted password length.
pub const MIN_PASSWORD_LEN: usize = 8;

const EMAIL_PATTERN: &str = r"^[^\s@]+@[^\s@]+\.[^\s@]+$";

/// A signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub uid: String,
    pub email: String,
    /// Bearer token for managed backends
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

impl Session {
    /// Read a saved session; `Ok(None)` when no file exists.
    pub async fn load(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref();
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, serde_json::to_string_pretty(self)?).await?;
        log::debug!("Saved session for {} to {}", self.email, path.display());
        Ok(())
    }

    /// Remove a saved session. Returns whether one existed.
    pub async fn clear(path: impl AsRef<Path>) -> Result<bool> {
        match tokio::fs::remove_file(path.as_ref()).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Trait for email/password identity providers.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Short backend name for logs.
    fn backend_tag(&self) -> &'static str;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session>;
}

/// Credentials entered on the sign-in page.
#[derive(Debug, Clone, Default)]
pub struct SignInForm {
    pub email: String,
    pub password: String,
}

impl SignInForm {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let email_re = Regex::new(EMAIL_PATTERN).map_err(|e| AppError::config(e.to_string()))?;
        let mut errors = ValidationErrors::new();
        if !email_re.is_match(&self.email) {
            errors.push("email", "Invalid email");
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            errors.push(
                "password",
                format!("Password must be at least {} characters", MIN_PASSWORD_LEN),
            );
        }
        errors.into_result()
    }

    /// Validate, then sign in through `provider`.
    pub async fn submit(&self, provider: &dyn AuthProvider) -> Result<Session> {
        self.validate()?;
        match provider.sign_in(&self.email, &self.password).await {
            Ok(session) => {
                log::info!("Signed in {} via {}", session.email, provider.backend_tag());
                Ok(session)
            }
            Err(e) => {
                log::warn!("Sign-in for {} failed: {}", self.email, e);
                Err(AppError::invalid_credentials())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::INVALID_CREDENTIALS;
    use tempfile::TempDir;

    struct Rejecting;

    #[async_trait]
    impl AuthProvider for Rejecting {
        fn backend_tag(&self) -> &'static str {
            "rejecting"
        }

        async fn sign_in(&self, _email: &str, _password: &str) -> Result<Session> {
            Err(AppError::store_read("connection reset"))
        }
    }

    #[test]
    fn test_sign_in_form_validation() {
        assert!(SignInForm::new("admin@example.com", "hunter22").validate().is_ok());

        let Err(AppError::Validation(errors)) = SignInForm::new("admin", "short").validate()
        else {
            panic!("expected validation error");
        };
        assert_eq!(errors.get("email"), Some("Invalid email"));
        assert_eq!(
            errors.get("password"),
            Some("Password must be at least 8 characters")
        );

        assert!(SignInForm::new("a b@example.com", "longenough").validate().is_err());
        assert!(SignInForm::new("admin@localhost", "longenough").validate().is_err());
    }

    #[tokio::test]
    async fn test_provider_errors_become_generic_message() {
        let err = SignInForm::new("admin@example.com", "hunter22")
            .submit(&Rejecting)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Auth(ref m) if m == INVALID_CREDENTIALS));
    }

    #[tokio::test]
    async fn test_session_file_lifecycle() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("session.json");

        assert_eq!(Session::load(&path).await.unwrap(), None);

        let session = Session {
            uid: "u1".into(),
            email: "admin@example.com".into(),
            id_token: None,
        };
        session.save(&path).await.unwrap();
        assert_eq!(Session::load(&path).await.unwrap(), Some(session));

        assert!(Session::clear(&path).await.unwrap());
        assert!(!Session::clear(&path).await.unwrap());
    }
}
