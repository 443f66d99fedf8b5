use async_trait::async_trait;
use tokio::io::AsyncRead;
use tracing::{debug, error, info};

use super::error::UploadError;
use crate::config::EffectiveConfig;
use crate::size::format_size;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutput {
    pub bytes: u64,
    pub parts: usize,
    /// Set when the object went up as a multipart upload
    pub upload_id: Option<String>,
}

/// Anything that can store a whole stream under `bucket/key`.
#[async_trait]
pub trait ObjectUpload: Send + Sync {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        body: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<UploadOutput, UploadError>;
}

/// Upload the whole of `body` to the bucket and key named in `config`.
///
/// Errors from the uploader are returned as they are, after being logged.
pub async fn upload_stream<U>(
    uploader: &U,
    config: &EffectiveConfig,
    body: &mut (dyn AsyncRead + Send + Unpin),
) -> Result<UploadOutput, UploadError>
where
    U: ObjectUpload + ?Sized,
{
    match uploader.upload(&config.bucket, &config.key, body).await {
        Ok(output) => {
            info!(
                "Uploaded {} to s3://{}/{} ({} part(s))",
                format_size(output.bytes),
                config.bucket,
                config.key,
                output.parts
            );
            if let Some(upload_id) = &output.upload_id {
                debug!("Completed multipart upload {}", upload_id);
            }
            Ok(output)
        }
        Err(e) => {
            error!("Failed to upload s3://{}/{}: {}", config.bucket, config.key, e);
            Err(e)
        }
    }
}
