pub mod client;
pub mod error;
pub mod multipart;
pub mod upload;

pub use client::S3Client;
pub use multipart::{Uploader, UploaderOptions};
pub use upload::upload_stream;
