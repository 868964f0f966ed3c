//! Managed identity provider, email/password sign-in over REST.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{AuthProvider, Session};
use crate::error::{AppError, Result};
use crate::models::FirebaseConfig;

const DEFAULT_ENDPOINT: &str = "https://identitytoolkit.googleapis.com";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignInRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    local_id: String,
    email: String,
    id_token: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// REST client for `accounts:signInWithPassword`.
#[derive(Clone)]
pub struct IdentityToolkitAuth {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl IdentityToolkitAuth {
    pub fn new(client: Client, config: &FirebaseConfig) -> Self {
        Self::with_endpoint(client, DEFAULT_ENDPOINT, &config.api_key)
    }

    /// Create a provider against a custom endpoint (e.g. a local emulator).
    pub fn with_endpoint(client: Client, endpoint: &str, api_key: &str) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn sign_in_url(&self) -> String {
        format!(
            "{}/v1/accounts:signInWithPassword?key={}",
            self.endpoint, self.api_key
        )
    }
}

/// Provider error code from a failed response body, if it has one.
fn error_code(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .map(|b| b.error.message)
}

fn session_from(response: SignInResponse) -> Session {
    Session {
        uid: response.local_id,
        email: response.email,
        id_token: Some(response.id_token),
    }
}

#[async_trait]
impl AuthProvider for IdentityToolkitAuth {
    fn backend_tag(&self) -> &'static str {
        "identitytoolkit"
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        let request = SignInRequest {
            email,
            password,
            return_secure_token: true,
        };
        let response = self
            .client
            .post(self.sign_in_url())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::debug!(
                "Sign-in rejected ({}): {}",
                status,
                error_code(&body).unwrap_or_else(|| "no error code".into())
            );
            return Err(AppError::invalid_credentials());
        }

        Ok(session_from(response.json::<SignInResponse>().await?))
    }
}
