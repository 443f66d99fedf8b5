use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_config::retry::RetryConfig;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, StorageClass};
use aws_sdk_s3::Client;
use bytes::Bytes;
use tracing::debug;

use super::error::UploadError;
use crate::config::EffectiveConfig;

/// Destination of a single object upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectTarget {
    pub bucket: String,
    pub key: String,
    pub storage_class: Option<String>,
}

/// The S3 calls the uploader needs. Implemented for the SDK client and for
/// in-memory fakes in tests.
#[async_trait]
pub trait ObjectApi: Send + Sync + 'static {
    async fn put(&self, target: &ObjectTarget, body: Bytes) -> Result<(), UploadError>;

    async fn create_multipart(&self, target: &ObjectTarget) -> Result<String, UploadError>;

    async fn put_part(
        &self,
        target: &ObjectTarget,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<CompletedPart, UploadError>;

    async fn complete_multipart(
        &self,
        target: &ObjectTarget,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<(), UploadError>;

    async fn abort_multipart(
        &self,
        target: &ObjectTarget,
        upload_id: &str,
    ) -> Result<(), UploadError>;
}

pub struct S3Client {
    client: Client,
}

impl S3Client {
    /// Build a client with a fixed region, the configured endpoint and static
    /// credentials from the config file.
    pub async fn new(config: &EffectiveConfig) -> Self {
        let credentials = Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
            None,
            None,
            "z3-config",
        );

        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .endpoint_url(endpoint_url(&config.host))
            .credentials_provider(credentials)
            .retry_config(RetryConfig::standard().with_max_attempts(config.max_retries + 1))
            .load()
            .await;

        Self {
            client: Client::new(&sdk_config),
        }
    }

    pub fn into_inner(self) -> Client {
        self.client
    }
}

/// Endpoint URL for a configured host; bare host names default to https.
pub fn endpoint_url(host: &str) -> String {
    if host.contains("://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}

fn storage_class(target: &ObjectTarget) -> Option<StorageClass> {
    target.storage_class.as_deref().map(StorageClass::from)
}

#[async_trait]
impl ObjectApi for Client {
    async fn put(&self, target: &ObjectTarget, body: Bytes) -> Result<(), UploadError> {
        let len = body.len();
        self.put_object()
            .bucket(&target.bucket)
            .key(&target.key)
            .set_storage_class(storage_class(target))
            .content_length(len as i64)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(Box::new)?;
        debug!("PutObject s3://{}/{} ({} bytes)", target.bucket, target.key, len);
        Ok(())
    }

    async fn create_multipart(&self, target: &ObjectTarget) -> Result<String, UploadError> {
        let output = self
            .create_multipart_upload()
            .bucket(&target.bucket)
            .key(&target.key)
            .set_storage_class(storage_class(target))
            .send()
            .await
            .map_err(Box::new)?;

        output
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| UploadError::MissingUploadId {
                bucket: target.bucket.clone(),
                key: target.key.clone(),
            })
    }

    async fn put_part(
        &self,
        target: &ObjectTarget,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<CompletedPart, UploadError> {
        let output = self
            .upload_part()
            .bucket(&target.bucket)
            .key(&target.key)
            .upload_id(upload_id)
            .part_number(part_number)
            .content_length(body.len() as i64)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| UploadError::UploadPart {
                part_number,
                source: Box::new(e),
            })?;

        Ok(CompletedPart::builder()
            .part_number(part_number)
            .e_tag(output.e_tag().unwrap_or_default())
            .build())
    }

    async fn complete_multipart(
        &self,
        target: &ObjectTarget,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<(), UploadError> {
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();

        self.complete_multipart_upload()
            .bucket(&target.bucket)
            .key(&target.key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(Box::new)?;
        Ok(())
    }

    async fn abort_multipart(
        &self,
        target: &ObjectTarget,
        upload_id: &str,
    ) -> Result<(), UploadError> {
        self.abort_multipart_upload()
            .bucket(&target.bucket)
            .key(&target.key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(Box::new)?;

        debug!("Aborted multipart upload {}", upload_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_url() {
        assert_eq!(endpoint_url("s3.amazonaws.com"), "https://s3.amazonaws.com");
        assert_eq!(
            endpoint_url("http://localhost:9000"),
            "http://localhost:9000"
        );
    }

    #[test]
    fn test_storage_class_mapping() {
        let target = ObjectTarget {
            bucket: "b".to_string(),
            key: "k".to_string(),
            storage_class: Some("STANDARD_IA".to_string()),
        };
        assert_eq!(storage_class(&target), Some(StorageClass::StandardIa));

        let target = ObjectTarget {
            storage_class: None,
            ..target
        };
        assert_eq!(storage_class(&target), None);
    }
}
