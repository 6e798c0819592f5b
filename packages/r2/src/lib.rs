#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! S3-compatible object store client for bucket backups.
//!
//! [`R2Client`] implements [`ObjectStore`] on top of `aws-sdk-s3`, using only
//! `ListObjectsV2` and `PutObject`. It works against Cloudflare R2 or any
//! other endpoint speaking the S3 API; the endpoint URL and static
//! credentials come from the backup configuration file.
//!
//! Uploads stream straight from disk via [`ByteStream::from_path`], so large
//! media files are never held in memory, and the file handle lives exactly as
//! long as the `PutObject` call.

use async_trait::async_trait;
use aws_config::Region;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::{Credentials, StalledStreamProtectionConfig};
use aws_sdk_s3::primitives::ByteStream;
use bucket_backup_sync::{ListPage, ObjectStore, StoreError, UploadBody};

/// Bucket used when the configuration does not name one.
pub const DEFAULT_BUCKET: &str = "backup";

/// Region used when the configuration does not name one. R2 ignores the
/// region but the SDK requires one for request signing.
pub const DEFAULT_REGION: &str = "auto";

/// Errors that can occur during S3 operations.
#[derive(Debug, thiserror::Error)]
pub enum R2Error {
    /// S3 `PutObject` failed.
    #[error("Failed to upload s3://{bucket}/{key}: {source}")]
    Upload {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
        /// Underlying SDK error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// S3 `ListObjectsV2` failed.
    #[error("Failed to list s3://{bucket}/{prefix}: {source}")]
    List {
        /// Bucket name.
        bucket: String,
        /// Key prefix.
        prefix: String,
        /// Underlying SDK error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A listing page claimed more results but carried no continuation
    /// token.
    #[error("Listing s3://{bucket}/{prefix} was truncated without a continuation token")]
    MissingContinuation {
        /// Bucket name.
        bucket: String,
        /// Key prefix.
        prefix: String,
    },

    /// The local file to upload could not be opened.
    #[error("Failed to read {path} for upload: {source}")]
    Body {
        /// Local path.
        path: String,
        /// Underlying stream error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Connection settings for an S3-compatible endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct R2Settings {
    /// Endpoint URL, e.g. `https://<account>.r2.cloudflarestorage.com`.
    pub endpoint_url: String,
    /// Access key ID.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: String,
    /// Signing region.
    pub region: String,
    /// Bucket all objects live in.
    pub bucket: String,
}

/// Client for an S3-compatible backup bucket.
pub struct R2Client {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl R2Client {
    /// Creates a client from static settings. No network call is made.
    ///
    /// The SDK's own retry layer is switched off: every failed call surfaces
    /// immediately, and the configured retry policy decides whether to try
    /// again.
    #[must_use]
    pub fn new(settings: &R2Settings) -> Self {
        let creds = Credentials::new(
            &settings.access_key_id,
            &settings.secret_access_key,
            None,
            None,
            "bucket-backup-config",
        );

        let config = aws_sdk_s3::Config::builder()
            .endpoint_url(&settings.endpoint_url)
            .region(Region::new(settings.region.clone()))
            .credentials_provider(creds)
            .force_path_style(true)
            .stalled_stream_protection(StalledStreamProtectionConfig::disabled())
            .retry_config(RetryConfig::disabled())
            .build();

        log::debug!(
            "S3 client for s3://{} at {}",
            settings.bucket,
            settings.endpoint_url
        );

        Self {
            client: aws_sdk_s3::Client::from_conf(config),
            bucket: settings.bucket.clone(),
        }
    }

    /// Name of the bucket this client reads and writes.
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectStore for R2Client {
    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<ListPage, StoreError> {
        let mut request = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix);

        if let Some(token) = continuation {
            request = request.continuation_token(token);
        }

        let output = request.send().await.map_err(|e| R2Error::List {
            bucket: self.bucket.clone(),
            prefix: prefix.to_string(),
            source: Box::new(e),
        })?;

        let keys: Vec<String> = output
            .contents()
            .iter()
            .filter_map(|obj| obj.key().map(str::to_string))
            .collect();

        let next = if output.is_truncated() == Some(true) {
            let token = output
                .next_continuation_token()
                .filter(|t| !t.is_empty())
                .ok_or_else(|| R2Error::MissingContinuation {
                    bucket: self.bucket.clone(),
                    prefix: prefix.to_string(),
                })?;
            Some(token.to_string())
        } else {
            None
        };

        log::trace!(
            "s3://{}/{prefix}: page of {} keys (more: {})",
            self.bucket,
            keys.len(),
            next.is_some()
        );

        Ok(ListPage { keys, next })
    }

    async fn put_object(&self, key: &str, body: &UploadBody) -> Result<(), StoreError> {
        let stream = body_stream(body).await?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(stream)
            .content_type("application/octet-stream")
            .send()
            .await
            .map_err(|e| R2Error::Upload {
                bucket: self.bucket.clone(),
                key: key.to_string(),
                source: Box::new(e),
            })?;

        log::debug!("  uploaded s3://{}/{key}", self.bucket);
        Ok(())
    }
}

/// Builds the request body, opening the file for [`UploadBody::File`].
async fn body_stream(body: &UploadBody) -> Result<ByteStream, R2Error> {
    match body {
        UploadBody::File(path) => ByteStream::from_path(path).await.map_err(|e| R2Error::Body {
            path: path.display().to_string(),
            source: Box::new(e),
        }),
        UploadBody::Bytes(bytes) => Ok(ByteStream::from(bytes.clone())),
    }
}
