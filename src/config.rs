// src/config.rs

//! Wiring the configured backends into a [`ServiceContext`].
//!
//! Handles are built once per process and passed down explicitly.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::auth::{AuthProvider, IdentityToolkitAuth, LocalAuth, Session};
use crate::context::ServiceContext;
use crate::error::{AppError, Result};
use crate::guard::{AccessGuard, UsersCollectionLookup};
use crate::models::{Backend, Config, ObjectBackend};
use crate::services::MeasurementService;
use crate::storage::{
    DocumentStore, FirebaseStorage, FirestoreStore, LocalStorage, ObjectStore,
};
use crate::utils::http;

/// Config file name inside the storage directory.
pub const CONFIG_FILE: &str = "radnorms.toml";

/// Saved CLI session inside the storage directory.
pub const SESSION_FILE: &str = "session.json";

/// Load `radnorms.toml` from `dir`, falling back to defaults.
///
/// `storage.root_dir` is resolved against `dir`; an unset root is `dir`
/// itself.
pub fn load_config(dir: &Path) -> Config {
    let path = dir.join(CONFIG_FILE);
    let mut config = if path.exists() {
        Config::load_or_default(&path)
    } else {
        log::debug!("No config at {}; using defaults", path.display());
        Config::default()
    };
    config.storage.root_dir = resolve_root(dir, &config.storage.root_dir);
    config
}

fn resolve_root(dir: &Path, root: &Path) -> PathBuf {
    if root.is_absolute() {
        root.to_path_buf()
    } else if root.components().all(|c| c == Component::CurDir) {
        dir.to_path_buf()
    } else {
        dir.join(root)
    }
}

pub fn session_path(config: &Config) -> PathBuf {
    config.storage.root_dir.join(SESSION_FILE)
}

/// Every backend handle an application instance needs.
pub struct Backends {
    pub context: ServiceContext,
    pub auth: Arc<dyn AuthProvider>,
    /// Present when accounts are kept locally
    pub local_auth: Option<Arc<LocalAuth>>,
}

impl Backends {
    /// Connect the backends selected in `config`.
    ///
    /// A session token, if any, is attached to the managed backend clients.
    pub async fn connect(config: &Config, session: Option<&Session>) -> Result<Self> {
        let id_token = session.and_then(|s| s.id_token.clone());
        let local = Arc::new(LocalStorage::new(&config.storage.root_dir));
        let uses_firebase = config.storage.backend == Backend::Firebase
            || config.storage.objects() == ObjectBackend::Firebase;
        let http_client = if uses_firebase {
            Some(http::create_async_client(&config.firebase)?)
        } else {
            None
        };
        let client = || {
            http_client
                .clone()
                .ok_or_else(|| AppError::config("HTTP client not initialised"))
        };

        let documents: Arc<dyn DocumentStore> = match config.storage.backend {
            Backend::Local => local.clone(),
            Backend::Firebase => Arc::new(
                FirestoreStore::new(client()?, &config.firebase).with_id_token(id_token.clone()),
            ),
        };

        let objects: Arc<dyn ObjectStore> = match config.storage.objects() {
            ObjectBackend::Local => local.clone(),
            ObjectBackend::Firebase => Arc::new(
                FirebaseStorage::new(client()?, &config.firebase).with_id_token(id_token),
            ),
            #[cfg(feature = "s3")]
            ObjectBackend::S3 => Arc::new(
                crate::storage::S3ObjectStore::from_env(&config.storage.s3).await?,
            ),
            #[cfg(not(feature = "s3"))]
            ObjectBackend::S3 => {
                return Err(AppError::config(
                    "storage.object_backend = \"s3\" requires the `s3` feature",
                ));
            }
        };

        let (auth, local_auth): (Arc<dyn AuthProvider>, _) = match config.storage.backend {
            Backend::Local => {
                let local_auth = Arc::new(LocalAuth::new(&config.storage.root_dir));
                (local_auth.clone(), Some(local_auth))
            }
            Backend::Firebase => (
                Arc::new(IdentityToolkitAuth::new(client()?, &config.firebase)),
                None,
            ),
        };

        log::debug!(
            "Backends: documents={} objects={} auth={}",
            documents.backend_tag(),
            objects.backend_tag(),
            auth.backend_tag()
        );

        Ok(Self {
            context: ServiceContext::new(documents, objects),
            auth,
            local_auth,
        })
    }

    pub fn measurements(&self) -> MeasurementService {
        MeasurementService::new(self.context.clone())
    }

    /// Guard reading privileges from the configured document store.
    pub fn guard(&self) -> AccessGuard {
        AccessGuard::new(Arc::new(UsersCollectionLookup::new(
            self.context.documents.clone(),
        )))
    }
}
