// src/guard.rs

//! Admin route guard.
//!
//! A guard starts out `Loading` and decides once the privilege lookup has
//! resolved. Guarded content may only render after a `Render` decision.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::auth::Session;
use crate::error::Result;
use crate::models::USERS_COLLECTION;
use crate::storage::{Document, DocumentStore};

/// Field of `users/{uid}` holding the privilege flag.
pub const ADMIN_FIELD: &str = "isAdmin";

/// Navigable locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Home,
    Detail(String),
    SignIn { redirect_to: Option<Box<Route>> },
    AdminMeasurements,
}

impl Route {
    /// Sign-in page that returns to `destination` afterwards.
    pub fn sign_in_then(destination: Route) -> Self {
        Route::SignIn {
            redirect_to: Some(Box::new(destination)),
        }
    }

    pub fn path(&self) -> String {
        match self {
            Route::Home => "/".to_string(),
            Route::Detail(id) => format!("/measurements/{}", id),
            Route::SignIn { redirect_to: None } => "/login".to_string(),
            Route::SignIn {
                redirect_to: Some(to),
            } => format!("/login?redirectTo={}", to.path()),
            Route::AdminMeasurements => "/admin/measurements".to_string(),
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path())
    }
}

/// Resolves whether a user holds the admin privilege.
#[async_trait]
pub trait PrivilegeLookup: Send + Sync {
    async fn is_admin(&self, uid: &str) -> Result<bool>;
}

/// Reads the flag from `users/{uid}.isAdmin`.
///
/// Only a JSON `true` counts; a missing document, missing field or any
/// other value is unprivileged.
pub struct UsersCollectionLookup {
    documents: Arc<dyn DocumentStore>,
}

impl UsersCollectionLookup {
    pub fn new(documents: Arc<dyn DocumentStore>) -> Self {
        Self { documents }
    }
}

#[async_trait]
impl PrivilegeLookup for UsersCollectionLookup {
    async fn is_admin(&self, uid: &str) -> Result<bool> {
        let doc = self.documents.get(USERS_COLLECTION, uid).await?;
        Ok(doc.and_then(|d| d.get(ADMIN_FIELD).cloned()) == Some(Value::Bool(true)))
    }
}

/// Set `users/{uid}.isAdmin = true`, keeping other fields of the document.
pub async fn grant_admin(documents: &dyn DocumentStore, uid: &str) -> Result<()> {
    let mut doc: Document = documents
        .get(USERS_COLLECTION, uid)
        .await?
        .unwrap_or_default();
    doc.insert(ADMIN_FIELD.to_string(), Value::Bool(true));
    documents.set(USERS_COLLECTION, uid, doc).await?;
    log::info!("Granted admin to {}", uid);
    Ok(())
}

/// Outcome of a guard check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Redirect(Route),
    Render,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardState {
    Loading,
    Decided(GuardDecision),
}

/// Gate in front of admin routes.
pub struct AccessGuard {
    lookup: Arc<dyn PrivilegeLookup>,
    state: GuardState,
}

impl AccessGuard {
    pub fn new(lookup: Arc<dyn PrivilegeLookup>) -> Self {
        Self {
            lookup,
            state: GuardState::Loading,
        }
    }

    pub fn state(&self) -> &GuardState {
        &self.state
    }

    /// Whether guarded content may be shown.
    pub fn may_render(&self) -> bool {
        self.state == GuardState::Decided(GuardDecision::Render)
    }

    /// Decide access to `destination` for `session`.
    pub async fn check(&mut self, session: Option<&Session>, destination: Route) -> GuardDecision {
        self.state = GuardState::Loading;

        let decision = match session {
            None => GuardDecision::Redirect(Route::sign_in_then(destination)),
            Some(session) => match self.lookup.is_admin(&session.uid).await {
                Ok(true) => GuardDecision::Render,
                Ok(false) => {
                    log::info!("{} is not an admin; redirecting home", session.email);
                    GuardDecision::Redirect(Route::Home)
                }
                Err(e) => {
                    log::error!("Error checking admin status for {}: {}", session.uid, e);
                    GuardDecision::Redirect(Route::Home)
                }
            },
        };

        self.state = GuardState::Decided(decision.clone());
        decision
    }
}
