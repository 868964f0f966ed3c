//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration (`radnorms.toml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Which backend holds documents, blobs and accounts
    #[serde(default)]
    pub storage: StorageConfig,

    /// Managed backend project settings
    #[serde(default)]
    pub firebase: FirebaseConfig,

    /// Browse/search behavior
    #[serde(default)]
    pub search: SearchConfig,

    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate that the selected backends have what they need.
    pub fn validate(&self) -> Result<()> {
        match self.storage.backend {
            Backend::Local => {
                if self.storage.root_dir.as_os_str().is_empty() {
                    return Err(AppError::config("storage.root_dir is empty"));
                }
            }
            Backend::Firebase => {
                if self.firebase.project_id.trim().is_empty() {
                    return Err(AppError::config("firebase.project_id is empty"));
                }
                if self.firebase.api_key.trim().is_empty() {
                    return Err(AppError::config("firebase.api_key is empty"));
                }
            }
        }

        match self.storage.objects() {
            ObjectBackend::Local => {}
            ObjectBackend::Firebase => {
                if self.firebase.storage_bucket.trim().is_empty() {
                    return Err(AppError::config("firebase.storage_bucket is empty"));
                }
            }
            ObjectBackend::S3 => {
                if self.storage.s3.bucket.trim().is_empty() {
                    return Err(AppError::config("storage.s3.bucket is empty"));
                }
                if self.storage.s3.public_base_url.trim().is_empty() {
                    return Err(AppError::config("storage.s3.public_base_url is empty"));
                }
            }
        }

        if self.search.debounce_ms == 0 {
            return Err(AppError::config("search.debounce_ms must be > 0"));
        }
        Ok(())
    }
}

/// Document/auth backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Files under `storage.root_dir`
    #[default]
    Local,
    /// Managed document DB, object storage and identity provider
    Firebase,
}

/// Object storage backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectBackend {
    Local,
    Firebase,
    S3,
}

/// Storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: Backend,

    /// Overrides where image blobs go; defaults to the main backend
    #[serde(default)]
    pub object_backend: Option<ObjectBackend>,

    /// Root directory for the local backend and the CLI session file.
    /// Relative paths are taken from the directory holding the config file.
    #[serde(default = "defaults::root_dir")]
    pub root_dir: PathBuf,

    #[serde(default)]
    pub s3: S3Config,
}

impl StorageConfig {
    /// Effective object storage backend.
    pub fn objects(&self) -> ObjectBackend {
        self.object_backend.unwrap_or(match self.backend {
            Backend::Local => ObjectBackend::Local,
            Backend::Firebase => ObjectBackend::Firebase,
        })
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            object_backend: None,
            root_dir: defaults::root_dir(),
            s3: S3Config::default(),
        }
    }
}

/// S3 object storage settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct S3Config {
    #[serde(default)]
    pub bucket: String,

    /// Key prefix prepended to every object path
    #[serde(default)]
    pub prefix: String,

    /// Base URL objects are served from (e.g. a CDN in front of the bucket)
    #[serde(default)]
    pub public_base_url: String,
}

/// Managed backend project settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirebaseConfig {
    #[serde(default)]
    pub project_id: String,

    /// Web API key used for email/password sign-in
    #[serde(default)]
    pub api_key: String,

    #[serde(default)]
    pub storage_bucket: String,

    #[serde(default = "defaults::database")]
    pub database: String,

    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,
}

impl Default for FirebaseConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            api_key: String::new(),
            storage_bucket: String::new(),
            database: defaults::database(),
            timeout_secs: defaults::timeout(),
        }
    }
}

/// Browse/search settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Quiet period before a query is applied
    #[serde(default = "defaults::debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: defaults::debounce_ms(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    pub fn root_dir() -> PathBuf {
        PathBuf::from(".")
    }
    pub fn database() -> String {
        "(default)".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn debounce_ms() -> u64 {
        300
    }
    pub fn log_level() -> String {
        "info".into()
    }
}
