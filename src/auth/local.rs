//! Accounts file for the local backend.
//!
//! `{root}/accounts.json` holds one entry per account with a salted
//! SHA-256 password hash. Identifiers are derived from the email and the
//! registration time.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use super::{AuthProvider, Session, SignInForm};
use crate::error::{AppError, Result};

/// File name of the accounts list inside the storage root.
pub const ACCOUNTS_FILE: &str = "accounts.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Account {
    uid: String,
    email: String,
    salt: String,
    password_hash: String,
}

fn digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(b":");
        }
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

fn hash_password(salt: &str, password: &str) -> String {
    digest(&[salt, password])
}

/// Email/password accounts stored next to the local document store.
pub struct LocalAuth {
    accounts_path: PathBuf,
    lock: Mutex<()>,
}

impl LocalAuth {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            accounts_path: root_dir.as_ref().join(ACCOUNTS_FILE),
            lock: Mutex::new(()),
        }
    }

    async fn read_accounts(&self) -> Result<Vec<Account>> {
        match tokio::fs::read_to_string(&self.accounts_path).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_accounts(&self, accounts: &[Account]) -> Result<()> {
        if let Some(parent) = self.accounts_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.accounts_path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_string_pretty(accounts)?).await?;
        tokio::fs::rename(&tmp, &self.accounts_path).await?;
        Ok(())
    }

    /// Create an account and return its session.
    pub async fn register(&self, email: &str, password: &str) -> Result<Session> {
        SignInForm::new(email, password).validate()?;

        let _guard = self.lock.lock().await;
        let mut accounts = self.read_accounts().await?;
        if accounts.iter().any(|a| a.email.eq_ignore_ascii_case(email)) {
            return Err(AppError::validation("email", "An account with this email already exists"));
        }

        let nanos = Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default()
            .to_string();
        let uid = digest(&[email, nanos.as_str()])[..28].to_string();
        let salt = digest(&[uid.as_str(), nanos.as_str(), "salt"])[..16].to_string();
        let account = Account {
            password_hash: hash_password(&salt, password),
            uid: uid.clone(),
            email: email.to_string(),
            salt,
        };
        accounts.push(account);
        self.write_accounts(&accounts).await?;

        log::info!("Registered account {} ({})", email, uid);
        Ok(Session {
            uid,
            email: email.to_string(),
            id_token: None,
        })
    }

    /// Account id for an email, if registered.
    pub async fn uid_for(&self, email: &str) -> Result<Option<String>> {
        Ok(self
            .read_accounts()
            .await?
            .into_iter()
            .find(|a| a.email.eq_ignore_ascii_case(email))
            .map(|a| a.uid))
    }
}

#[async_trait]
impl AuthProvider for LocalAuth {
    fn backend_tag(&self) -> &'static str {
        "local"
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        let accounts = self.read_accounts().await?;
        let account = accounts
            .iter()
            .find(|a| a.email.eq_ignore_ascii_case(email))
            .ok_or_else(AppError::invalid_credentials)?;

        if hash_password(&account.salt, password) != account.password_hash {
            return Err(AppError::invalid_credentials());
        }
        Ok(Session {
            uid: account.uid.clone(),
            email: account.email.clone(),
            id_token: None,
        })
    }
}
