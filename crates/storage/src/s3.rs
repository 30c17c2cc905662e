//! S3 object store backend
//!
//! Provides async S3-compatible storage with:
//! - Multipart sessions mapped onto S3 multipart uploads (part number = index + 1)
//! - Status-based classification of transient vs fatal part failures
//! - Custom endpoint support (for MinIO, LocalStack, etc.)

use async_trait::async_trait;
use aws_config::{AppName, BehaviorVersion};
use aws_sdk_s3::{
    config::{http::HttpResponse, Builder as S3ConfigBuilder, Region},
    error::{DisplayErrorContext, SdkError},
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart},
    Client,
};
use bytes::Bytes;
use checkpoint_core::{Error, PartResult, PartToken, Result, SessionId, StorageLocation};
use tracing::{debug, instrument};

use crate::ObjectStore;

/// Maximum number of parts in one S3 multipart upload
const MAX_PART_COUNT: usize = 10_000;

/// Application name sent with every request
const APP_NAME: &str = "checkpoint-io";

/// Default AWS region
const DEFAULT_REGION: &str = "us-east-1";

/// Configuration for S3ObjectStore
#[derive(Debug, Clone)]
pub struct S3Config {
    /// AWS region (default: "us-east-1")
    pub region: String,
    /// Optional custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style addressing (required for MinIO)
    pub force_path_style: bool,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            endpoint_url: None,
            force_path_style: false,
        }
    }
}

/// S3-compatible object store
///
/// Buckets come from each [`StorageLocation`], so one client serves any
/// number of buckets.
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    /// Wrap an existing client
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// Create an S3ObjectStore with custom configuration
    ///
    /// Uses environment variables or instance profile for credentials.
    pub async fn with_config(config: S3Config) -> Result<Self> {
        let app_name = AppName::new(APP_NAME).map_err(|e| Error::InvalidConfig {
            message: format!("invalid app name: {}", e),
        })?;

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region))
            .app_name(app_name)
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        if let Some(endpoint) = &config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        Ok(Self::from_client(Client::from_conf(s3_config_builder.build())))
    }

    /// Create S3ObjectStore for MinIO (convenience constructor)
    pub async fn minio(endpoint: &str) -> Result<Self> {
        Self::with_config(S3Config {
            endpoint_url: Some(endpoint.to_string()),
            force_path_style: true,
            ..Default::default()
        })
        .await
    }
}

/// HTTP status of a failed request, if the service answered at all
fn status_of<E>(err: &SdkError<E, HttpResponse>) -> Option<u16> {
    err.raw_response().map(|r| r.status().as_u16())
}

/// Whether a failed request is worth retrying
fn is_transient_status(status: Option<u16>) -> bool {
    match status {
        None => true,
        Some(code) => code >= 500 || code == 408 || code == 429,
    }
}

/// Map a part upload failure to a transient or fatal part error
fn part_error<E>(part: usize, err: SdkError<E, HttpResponse>) -> Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    let status = status_of(&err);
    let message = format!("S3 upload_part failed: {}", DisplayErrorContext(&err));
    if is_transient_status(status) {
        Error::TransientUpload { part, message }
    } else {
        Error::FatalUpload {
            part,
            attempts: 1,
            message,
        }
    }
}

fn storage_error<E>(operation: &str, err: SdkError<E, HttpResponse>) -> Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    Error::Storage {
        message: format!("S3 {} failed: {}", operation, DisplayErrorContext(&err)),
    }
}

fn part_number(index: usize) -> Result<i32> {
    i32::try_from(index + 1).map_err(|_| Error::InvalidConfig {
        message: format!("part index {} exceeds the S3 part number range", index),
    })
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn name(&self) -> &'static str {
        "s3"
    }

    fn max_part_count(&self) -> Option<usize> {
        Some(MAX_PART_COUNT)
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn create_multipart(&self, location: &StorageLocation) -> Result<SessionId> {
        location.require_key()?;

        let result = self
            .client
            .create_multipart_upload()
            .bucket(&location.bucket)
            .key(&location.key)
            .send()
            .await
            .map_err(|e| storage_error("create_multipart_upload", e))?;

        let upload_id = result.upload_id().ok_or_else(|| Error::Storage {
            message: "No upload_id returned".to_string(),
        })?;

        debug!(%location, upload_id, "Started multipart upload");
        Ok(upload_id.to_string())
    }

    async fn upload_part(
        &self,
        location: &StorageLocation,
        session_id: &str,
        part_index: usize,
        data: Bytes,
    ) -> Result<PartToken> {
        let result = self
            .client
            .upload_part()
            .bucket(&location.bucket)
            .key(&location.key)
            .upload_id(session_id)
            .part_number(part_number(part_index)?)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| part_error(part_index, e))?;

        result
            .e_tag()
            .map(String::from)
            .ok_or_else(|| Error::FatalUpload {
                part: part_index,
                attempts: 1,
                message: "S3 returned no ETag for part".to_string(),
            })
    }

    #[instrument(skip(self, parts), fields(backend = "s3", parts = parts.len()))]
    async fn complete_multipart(
        &self,
        location: &StorageLocation,
        session_id: &str,
        parts: &[PartResult],
    ) -> Result<()> {
        let completed_parts = parts
            .iter()
            .map(|part| {
                Ok(CompletedPart::builder()
                    .part_number(part_number(part.chunk_index)?)
                    .e_tag(&part.part_token)
                    .build())
            })
            .collect::<Result<Vec<_>>>()?;

        let completed_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&location.bucket)
            .key(&location.key)
            .upload_id(session_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .map_err(|e| storage_error("complete_multipart_upload", e))?;

        debug!(%location, "Completed multipart upload");
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn abort_multipart(&self, location: &StorageLocation, session_id: &str) -> Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&location.bucket)
            .key(&location.key)
            .upload_id(session_id)
            .send()
            .await
            .map_err(|e| storage_error("abort_multipart_upload", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn get_object(&self, location: &StorageLocation) -> Result<Bytes> {
        location.require_key()?;
        debug!(%location, "Reading from S3");

        let result = self
            .client
            .get_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|s| s.is_no_such_key()) {
                    Error::NotFound {
                        location: location.to_string(),
                    }
                } else {
                    storage_error("get_object", e)
                }
            })?;

        let bytes = result.body.collect().await.map_err(|e| Error::Storage {
            message: format!("Failed to read S3 response body: {}", e),
        })?;

        Ok(bytes.into_bytes())
    }

    #[instrument(skip(self, data), fields(backend = "s3", size = data.len()))]
    async fn put_object(&self, location: &StorageLocation, data: Bytes) -> Result<u64> {
        location.require_key()?;
        let size = data.len() as u64;

        self.client
            .put_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| storage_error("put_object", e))?;

        Ok(size)
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn delete_object(&self, location: &StorageLocation) -> Result<()> {
        // S3 deletes are idempotent, so absence has to be checked first.
        if !self.exists(location).await? {
            return Err(Error::NotFound {
                location: location.to_string(),
            });
        }

        self.client
            .delete_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .send()
            .await
            .map_err(|e| storage_error("delete_object", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn exists(&self, location: &StorageLocation) -> Result<bool> {
        location.require_key()?;

        match self
            .client
            .head_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|s| s.is_not_found()) => Ok(false),
            Err(e) => Err(storage_error("head_object", e)),
        }
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let mut results = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self.client.list_objects_v2().bucket(bucket).prefix(prefix);

            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| storage_error("list_objects_v2", e))?;

            results.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|object| object.key().map(String::from)),
            );

            if response.is_truncated() == Some(true) {
                continuation_token = response.next_continuation_token().map(String::from);
            } else {
                break;
            }
        }

        results.sort();
        debug!(count = results.len(), "Found S3 objects");
        Ok(results)
    }
}
