//! Managed object storage over its REST API.
//!
//! Objects live in a single bucket. Uploads return a download URL of the
//! form
//!
//! ```text
//! {endpoint}/v0/b/{bucket}/o/{percent-encoded path}?alt=media&token={token}
//! ```
//!
//! and deletes accept that URL (or a `gs://bucket/path` URL) back.

use async_trait::async_trait;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{FirebaseConfig, ImageUpload};
use crate::storage::{ObjectStore, paths};

const DEFAULT_ENDPOINT: &str = "https://firebasestorage.googleapis.com";

/// Object names are encoded as one path segment, slashes included.
const OBJECT_NAME: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Upload response; only the fields needed to build a download URL.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadedObject {
    name: String,
    #[serde(default)]
    download_tokens: Option<String>,
}

/// REST-backed object store.
#[derive(Clone)]
pub struct FirebaseStorage {
    client: Client,
    endpoint: String,
    bucket: String,
    id_token: Option<String>,
}

impl FirebaseStorage {
    pub fn new(client: Client, config: &FirebaseConfig) -> Self {
        Self::with_endpoint(client, DEFAULT_ENDPOINT, &config.storage_bucket)
    }

    /// Create a store against a custom endpoint (e.g. a local emulator).
    pub fn with_endpoint(client: Client, endpoint: &str, bucket: &str) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
            id_token: None,
        }
    }

    /// Attach a signed-in user's token to every request.
    pub fn with_id_token(mut self, id_token: Option<String>) -> Self {
        self.id_token = id_token;
        self
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.id_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn object_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/v0/b/{}/o/{}",
            self.endpoint,
            bucket,
            utf8_percent_encode(path, OBJECT_NAME)
        )
    }

    /// Public download URL for an uploaded object.
    pub fn download_url(&self, path: &str, token: Option<&str>) -> String {
        let mut url = format!("{}?alt=media", self.object_url(&self.bucket, path));
        if let Some(token) = token {
            url.push_str("&token=");
            url.push_str(token);
        }
        url
    }
}

/// Extract `(bucket, object path)` from a download or `gs://` URL.
pub fn parse_object_url(url: &str) -> Result<(String, String)> {
    let parsed = Url::parse(url)?;

    if parsed.scheme() == "gs" {
        let bucket = parsed
            .host_str()
            .ok_or_else(|| AppError::store_write(format!("missing bucket in {}", url)))?;
        let path = percent_decode_str(parsed.path().trim_start_matches('/'))
            .decode_utf8_lossy()
            .into_owned();
        return Ok((bucket.to_string(), path));
    }

    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.collect())
        .unwrap_or_default();
    match segments.as_slice() {
        ["v0", "b", bucket, "o", name] if !name.is_empty() => {
            let path = percent_decode_str(name).decode_utf8_lossy().into_owned();
            Ok((bucket.to_string(), path))
        }
        _ => Err(AppError::store_write(format!(
            "not an object storage URL: {}",
            url
        ))),
    }
}

#[async_trait]
impl ObjectStore for FirebaseStorage {
    fn backend_tag(&self) -> &'static str {
        "firebase-storage"
    }

    async fn put(&self, path: &str, upload: &ImageUpload) -> Result<String> {
        if !paths::is_safe(path) {
            return Err(AppError::store_write(format!("invalid object path '{}'", path)));
        }
        let url = format!("{}/v0/b/{}/o", self.endpoint, self.bucket);
        let response = self
            .request(Method::POST, &url)
            .query(&[("uploadType", "media"), ("name", path)])
            .header(reqwest::header::CONTENT_TYPE, upload.content_type.as_str())
            .body(upload.bytes.clone())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::store_write(format!(
                "object upload returned {}: {}",
                status,
                body.trim()
            )));
        }

        let uploaded: UploadedObject = response.json().await?;
        // Several comma-separated tokens may exist; any one grants access.
        let token = uploaded
            .download_tokens
            .as_deref()
            .and_then(|t| t.split(',').next())
            .filter(|t| !t.is_empty());
        log::debug!("Uploaded {} ({} bytes)", uploaded.name, upload.bytes.len());
        Ok(self.download_url(&uploaded.name, token))
    }

    async fn delete_by_url(&self, url: &str) -> Result<()> {
        let (bucket, path) = parse_object_url(url)?;
        let response = self
            .request(Method::DELETE, &self.object_url(&bucket, &path))
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(AppError::not_found(url)),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(AppError::store_write(format!(
                    "object delete returned {}: {}",
                    status,
                    body.trim()
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> FirebaseStorage {
        FirebaseStorage::with_endpoint(Client::new(), DEFAULT_ENDPOINT, "radnorms.appspot.com")
    }

    #[test]
    fn test_download_url_encodes_path_as_one_segment() {
        let url = storage().download_url("measurements/abc/axial view.png", Some("tok"));
        assert_eq!(
            url,
            "https://firebasestorage.googleapis.com/v0/b/radnorms.appspot.com/o/measurements%2Fabc%2Faxial%20view.png?alt=media&token=tok"
        );
    }

    #[test]
    fn test_parse_download_url_roundtrip() {
        let path = "measurements/1700000000000/c+d (1).png";
        let url = storage().download_url(path, Some("tok"));

        let (bucket, parsed) = parse_object_url(&url).unwrap();
        assert_eq!(bucket, "radnorms.appspot.com");
        assert_eq!(parsed, path);
    }

    #[test]
    fn test_parse_gs_url() {
        let (bucket, path) = parse_object_url("gs://radnorms.appspot.com/measurements/a/b.png").unwrap();
        assert_eq!(bucket, "radnorms.appspot.com");
        assert_eq!(path, "measurements/a/b.png");
    }

    #[test]
    fn test_parse_rejects_foreign_url() {
        assert!(parse_object_url("https://example.com/images/b.png").is_err());
        assert!(parse_object_url("not a url").is_err());
    }
}
