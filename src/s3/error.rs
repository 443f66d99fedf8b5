use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::abort_multipart_upload::AbortMultipartUploadError;
use aws_sdk_s3::operation::complete_multipart_upload::CompleteMultipartUploadError;
use aws_sdk_s3::operation::create_multipart_upload::CreateMultipartUploadError;
use aws_sdk_s3::operation::put_object::PutObjectError;
use aws_sdk_s3::operation::upload_part::UploadPartError;
use thiserror::Error;

/// Errors that can occur while streaming an object to S3
#[derive(Error, Debug)]
pub enum UploadError {
    /// Reading the input stream failed
    #[error("failed to read input: {0}")]
    Read(#[from] std::io::Error),

    #[error("put object failed: {0}")]
    PutObject(#[from] Box<SdkError<PutObjectError>>),

    #[error("create multipart upload failed: {0}")]
    CreateMultipart(#[from] Box<SdkError<CreateMultipartUploadError>>),

    #[error("upload of part {part_number} failed: {source}")]
    UploadPart {
        part_number: i32,
        #[source]
        source: Box<SdkError<UploadPartError>>,
    },

    #[error("complete multipart upload failed: {0}")]
    CompleteMultipart(#[from] Box<SdkError<CompleteMultipartUploadError>>),

    #[error("abort multipart upload failed: {0}")]
    AbortMultipart(#[from] Box<SdkError<AbortMultipartUploadError>>),

    /// S3 accepted the multipart upload but returned no upload id
    #[error("no upload id returned for s3://{bucket}/{key}")]
    MissingUploadId { bucket: String, key: String },

    /// The stream needs more parts than S3 allows for one object
    #[error("upload exceeds {max} parts with part size {part_size}, increase the chunk size")]
    TooManyParts { max: usize, part_size: u64 },

    #[error("upload task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("{0}")]
    Other(String),
}
