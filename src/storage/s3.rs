//! AWS S3 object storage implementation.
//!
//! Images are stored at `{prefix}/measurements/{ownerId}/{fileName}` and
//! served from `{public_base_url}/{key}` (typically a CDN in front of the
//! bucket), with each key segment percent-encoded. Deleting by URL strips
//! the public base back off and decodes the key.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};

use crate::error::{AppError, Result};
use crate::models::{ImageUpload, S3Config};
use crate::storage::{ObjectStore, paths};

/// Characters left as-is inside one key segment of a public URL.
const KEY_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// S3-based image storage.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    prefix: String,
    public_base_url: String,
}

impl S3ObjectStore {
    /// Create a new S3 storage instance.
    pub fn new(client: Client, config: &S3Config) -> Self {
        Self {
            client,
            bucket: config.bucket.clone(),
            prefix: config.prefix.trim_matches('/').to_string(),
            public_base_url: config.public_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Create S3 storage using the default AWS credential chain.
    pub async fn from_env(config: &S3Config) -> Result<Self> {
        let aws = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Ok(Self::new(Client::new(&aws), config))
    }

    fn key(&self, path: &str) -> String {
        if self.prefix.is_empty() {
            path.to_string()
        } else {
            format!("{}/{}", self.prefix, path)
        }
    }

    fn url_for_key(&self, key: &str) -> String {
        let encoded: Vec<String> = key
            .split('/')
            .map(|segment| utf8_percent_encode(segment, KEY_SEGMENT).to_string())
            .collect();
        format!("{}/{}", self.public_base_url, encoded.join("/"))
    }

    /// Object key behind a public URL produced by [`ObjectStore::put`].
    fn key_for_url(&self, url: &str) -> Result<String> {
        let encoded = url
            .strip_prefix(&self.public_base_url)
            .and_then(|rest| rest.strip_prefix('/'))
            .map(|key| key.split(['?', '#']).next().unwrap_or(key))
            .filter(|key| !key.is_empty())
            .ok_or_else(|| AppError::store_write(format!("URL not served by this bucket: {}", url)))?;

        percent_decode_str(encoded)
            .decode_utf8()
            .map(|key| key.into_owned())
            .map_err(|e| AppError::store_write(format!("bad object key in {}: {}", url, e)))
    }

    /// Check if an object exists in S3.
    async fn exists(&self, key: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_not_found() {
                    Ok(false)
                } else {
                    Err(AppError::store_write(service_err.to_string()))
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn backend_tag(&self) -> &'static str {
        "s3"
    }

    async fn put(&self, path: &str, upload: &ImageUpload) -> Result<String> {
        if !paths::is_safe(path) {
            return Err(AppError::store_write(format!("invalid object path '{}'", path)));
        }
        let key = self.key(path);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(upload.bytes.clone()))
            .content_type(&upload.content_type)
            .send()
            .await
            .map_err(|e| AppError::store_write(e.to_string()))?;

        log::info!(
            "Wrote {} bytes to s3://{}/{}",
            upload.bytes.len(),
            self.bucket,
            key
        );
        Ok(self.url_for_key(&key))
    }

    async fn delete_by_url(&self, url: &str) -> Result<()> {
        let key = self.key_for_url(url)?;

        // DeleteObject succeeds for missing keys, so check first to report
        // "already absent" the same way as the other backends.
        if !self.exists(&key).await? {
            return Err(AppError::not_found(url));
        }

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| AppError::store_write(e.to_string()))?;

        log::info!("Deleted s3://{}/{}", self.bucket, key);
        Ok(())
    }
}
