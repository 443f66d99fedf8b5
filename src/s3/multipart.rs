use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use indicatif::ProgressBar;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use super::client::{ObjectApi, ObjectTarget};
use super::error::UploadError;
use super::upload::{ObjectUpload, UploadOutput};

/// Smallest part S3 accepts, except for the last one
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Largest part S3 accepts
pub const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Read buffers start at this size and grow as a part fills
const READ_BUFFER_SIZE: u64 = 8 * 1024 * 1024;

/// Maximum number of parts in one multipart upload
pub const MAX_PARTS: usize = 10_000;

#[derive(Debug, Clone, Default)]
pub struct UploaderOptions {
    /// Bytes per part, `0` picks a size automatically.
    pub part_size: u64,
    pub concurrency: usize,
    /// Expected stream length, used to size parts automatically.
    pub estimated_size: u64,
    pub storage_class: Option<String>,
}

impl UploaderOptions {
    /// Part size after resolving automatic sizing, capped at [`MAX_PART_SIZE`].
    ///
    /// Automatic sizing starts at the minimum part size and grows so that the
    /// estimated stream fits into [`MAX_PARTS`].
    pub fn effective_part_size(&self) -> u64 {
        let part_size = if self.part_size > 0 {
            self.part_size
        } else {
            self.estimated_size
                .div_ceil(MAX_PARTS as u64)
                .max(MIN_PART_SIZE)
        };
        part_size.min(MAX_PART_SIZE)
    }
}

/// Streams a reader to S3, using a single PUT for small inputs and a
/// concurrent multipart upload otherwise.
pub struct Uploader<A: ObjectApi> {
    api: Arc<A>,
    options: UploaderOptions,
    progress: Option<ProgressBar>,
}

impl<A: ObjectApi> Uploader<A> {
    pub fn new(api: A, options: UploaderOptions) -> Self {
        Self {
            api: Arc::new(api),
            options,
            progress: None,
        }
    }

    pub fn with_progress(mut self, pb: ProgressBar) -> Self {
        self.progress = Some(pb);
        self
    }

    async fn upload_multipart(
        &self,
        target: ObjectTarget,
        first: Bytes,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        part_size: u64,
    ) -> Result<UploadOutput, UploadError> {
        let upload_id = self.api.create_multipart(&target).await?;
        debug!("Multipart upload initiated with ID: {}", upload_id);

        let target = Arc::new(target);
        let upload_id: Arc<str> = Arc::from(upload_id);

        match self
            .upload_parts(&target, &upload_id, first, reader, part_size)
            .await
        {
            Ok(output) => Ok(output),
            Err(e) => {
                if let Err(abort_err) = self.api.abort_multipart(&target, &upload_id).await {
                    error!("Failed to abort multipart upload: {}", abort_err);
                }
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        target: &Arc<ObjectTarget>,
        upload_id: &Arc<str>,
        first: Bytes,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        part_size: u64,
    ) -> Result<UploadOutput, UploadError> {
        let sem = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let mut tasks = JoinSet::new();
        let mut parts = Vec::new();
        let mut part_number = 0i32;
        let mut total_bytes = 0u64;
        let mut next = Some(first);

        while let Some(body) = next.take() {
            if part_number as usize >= MAX_PARTS {
                tasks.abort_all();
                return Err(UploadError::TooManyParts {
                    max: MAX_PARTS,
                    part_size,
                });
            }
            part_number += 1;
            total_bytes += body.len() as u64;

            let permit = Arc::clone(&sem)
                .acquire_owned()
                .await
                .map_err(|e| UploadError::Other(e.to_string()))?;
            let api = Arc::clone(&self.api);
            let target = Arc::clone(target);
            let upload_id = Arc::clone(upload_id);
            let progress = self.progress.clone();
            debug!("Uploading part {} ({} bytes)", part_number, body.len());

            tasks.spawn(async move {
                let _permit = permit;
                let len = body.len() as u64;
                let part = api.put_part(&target, &upload_id, part_number, body).await?;
                if let Some(pb) = progress {
                    pb.inc(len);
                }
                Ok::<_, UploadError>(part)
            });

            // stop reading as soon as a part has failed
            while let Some(done) = tasks.try_join_next() {
                match done? {
                    Ok(part) => parts.push(part),
                    Err(e) => {
                        tasks.abort_all();
                        return Err(e);
                    }
                }
            }

            let body = read_part(reader, part_size).await?;
            if !body.is_empty() {
                next = Some(body);
            }
        }

        while let Some(done) = tasks.join_next().await {
            match done? {
                Ok(part) => parts.push(part),
                Err(e) => {
                    tasks.abort_all();
                    return Err(e);
                }
            }
        }
        parts.sort_by_key(|part| part.part_number());

        debug!("All {} parts uploaded, completing multipart upload", parts.len());
        let count = parts.len();
        self.api
            .complete_multipart(target, upload_id, parts)
            .await?;

        Ok(UploadOutput {
            bytes: total_bytes,
            parts: count,
            upload_id: Some(upload_id.to_string()),
        })
    }
}

#[async_trait]
impl<A: ObjectApi> ObjectUpload for Uploader<A> {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        body: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<UploadOutput, UploadError> {
        let target = ObjectTarget {
            bucket: bucket.to_string(),
            key: key.to_string(),
            storage_class: self.options.storage_class.clone(),
        };
        let part_size = self.options.effective_part_size();

        let first = read_part(body, part_size).await?;
        if (first.len() as u64) < part_size {
            let len = first.len() as u64;
            self.api.put(&target, first).await?;
            if let Some(pb) = &self.progress {
                pb.inc(len);
            }
            debug!("Uploaded s3://{}/{} in a single request", bucket, key);
            return Ok(UploadOutput {
                bytes: len,
                parts: 1,
                upload_id: None,
            });
        }

        info!(
            "Starting multipart upload to s3://{}/{} (part size {} bytes, {} workers)",
            bucket,
            key,
            part_size,
            self.options.concurrency.max(1)
        );
        self.upload_multipart(target, first, body, part_size).await
    }
}

/// Read up to `part_size` bytes, stopping early only at end of stream.
async fn read_part(
    reader: &mut (dyn AsyncRead + Send + Unpin),
    part_size: u64,
) -> Result<Bytes, UploadError> {
    let mut buffer = BytesMut::with_capacity(part_size.min(READ_BUFFER_SIZE) as usize);
    let mut limited = reader.take(part_size);
    while limited.read_buf(&mut buffer).await? > 0 {}
    Ok(buffer.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::types::CompletedPart;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeStore {
        puts: Mutex<Vec<(ObjectTarget, Bytes)>>,
        created: Mutex<Vec<ObjectTarget>>,
        parts: Mutex<Vec<(i32, Bytes)>>,
        completed: Mutex<Vec<Vec<i32>>>,
        aborted: AtomicUsize,
        fail_part: Option<i32>,
    }

    #[async_trait]
    impl ObjectApi for Arc<FakeStore> {
        async fn put(&self, target: &ObjectTarget, body: Bytes) -> Result<(), UploadError> {
            self.puts.lock().unwrap().push((target.clone(), body));
            Ok(())
        }

        async fn create_multipart(&self, target: &ObjectTarget) -> Result<String, UploadError> {
            self.created.lock().unwrap().push(target.clone());
            Ok("upload-1".to_string())
        }

        async fn put_part(
            &self,
            _target: &ObjectTarget,
            upload_id: &str,
            part_number: i32,
            body: Bytes,
        ) -> Result<CompletedPart, UploadError> {
            assert_eq!(upload_id, "upload-1");
            if self.fail_part == Some(part_number) {
                return Err(UploadError::Other(format!("part {} rejected", part_number)));
            }
            // later parts finish first
            tokio::time::sleep(std::time::Duration::from_millis(
                (10 - part_number.min(10)) as u64,
            ))
            .await;
            self.parts.lock().unwrap().push((part_number, body));
            Ok(CompletedPart::builder()
                .part_number(part_number)
                .e_tag(format!("etag-{}", part_number))
                .build())
        }

        async fn complete_multipart(
            &self,
            _target: &ObjectTarget,
            _upload_id: &str,
            parts: Vec<CompletedPart>,
        ) -> Result<(), UploadError> {
            let numbers = parts.iter().filter_map(|p| p.part_number()).collect();
            self.completed.lock().unwrap().push(numbers);
            Ok(())
        }

        async fn abort_multipart(
            &self,
            _target: &ObjectTarget,
            _upload_id: &str,
        ) -> Result<(), UploadError> {
            self.aborted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn options(part_size: u64, concurrency: usize) -> UploaderOptions {
        UploaderOptions {
            part_size,
            concurrency,
            estimated_size: 0,
            storage_class: Some("STANDARD_IA".to_string()),
        }
    }

    fn input(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_effective_part_size() {
        assert_eq!(options(8 * 1024 * 1024, 1).effective_part_size(), 8 * 1024 * 1024);
        assert_eq!(options(0, 1).effective_part_size(), MIN_PART_SIZE);

        let auto = UploaderOptions {
            estimated_size: 100 * 1024 * 1024 * 1024,
            ..options(0, 1)
        };
        assert_eq!(
            auto.effective_part_size(),
            (100u64 * 1024 * 1024 * 1024).div_ceil(10_000)
        );

        let small = UploaderOptions {
            estimated_size: 1024,
            ..options(0, 1)
        };
        assert_eq!(small.effective_part_size(), MIN_PART_SIZE);

        assert_eq!(options(1_000_000_000_000, 1).effective_part_size(), MAX_PART_SIZE);
        let huge = UploaderOptions {
            estimated_size: u64::MAX,
            ..options(0, 1)
        };
        assert_eq!(huge.effective_part_size(), MAX_PART_SIZE);
    }

    #[tokio::test]
    async fn test_huge_part_size_does_not_reserve_whole_part() {
        let store = Arc::new(FakeStore::default());
        let uploader = Uploader::new(Arc::clone(&store), options(1_000_000_000_000_000_000, 4));

        let output = uploader
            .upload("bucket", "tiny", &mut &b"tiny"[..])
            .await
            .unwrap();

        assert_eq!(output.bytes, 4);
        assert_eq!(store.puts.lock().unwrap()[0].1.as_ref(), b"tiny");
    }

    #[tokio::test]
    async fn test_too_many_parts_is_rejected() {
        let store = Arc::new(FakeStore::default());
        let uploader = Uploader::new(Arc::clone(&store), options(1, 16));
        let data = input(MAX_PARTS + 1);

        let err = uploader
            .upload("bucket", "overflow", &mut data.as_slice())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            UploadError::TooManyParts { max: MAX_PARTS, part_size: 1 }
        ));
        assert_eq!(store.aborted.load(Ordering::SeqCst), 1);
        assert!(store.completed.lock().unwrap().is_empty());

        let store = Arc::new(FakeStore::default());
        let uploader = Uploader::new(Arc::clone(&store), options(1, 16));
        let data = input(MAX_PARTS);

        let output = uploader
            .upload("bucket", "limit", &mut data.as_slice())
            .await
            .unwrap();

        assert_eq!(output.parts, MAX_PARTS);
        assert_eq!(store.completed.lock().unwrap()[0].len(), MAX_PARTS);
    }

    struct BrokenPipe;

    impl AsyncRead for BrokenPipe {
        fn poll_read(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "input closed",
            )))
        }
    }

    #[tokio::test]
    async fn test_read_failure_aborts_upload() {
        let store = Arc::new(FakeStore::default());
        let uploader = Uploader::new(Arc::clone(&store), options(1000, 2));
        let data = input(1500);
        let mut reader = data.as_slice().chain(BrokenPipe);

        let err = uploader
            .upload("bucket", "truncated", &mut reader)
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Read(ref e) if e.kind() == std::io::ErrorKind::BrokenPipe));
        assert_eq!(store.created.lock().unwrap().len(), 1);
        assert_eq!(store.aborted.load(Ordering::SeqCst), 1);
        assert!(store.completed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_small_stream_uses_single_put() {
        let store = Arc::new(FakeStore::default());
        let uploader = Uploader::new(Arc::clone(&store), options(1024, 4));
        let data = input(100);

        let output = uploader
            .upload("bucket", "small", &mut data.as_slice())
            .await
            .unwrap();

        assert_eq!(output.bytes, 100);
        assert_eq!(output.parts, 1);
        assert!(output.upload_id.is_none());
        let puts = store.puts.lock().unwrap();
        assert_eq!(puts.len(), 1);
        assert_eq!(puts[0].0.key, "small");
        assert_eq!(puts[0].0.storage_class.as_deref(), Some("STANDARD_IA"));
        assert_eq!(puts[0].1.as_ref(), data.as_slice());
        assert!(store.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_stream_uploads_empty_object() {
        let store = Arc::new(FakeStore::default());
        let uploader = Uploader::new(Arc::clone(&store), options(1024, 4));

        let output = uploader
            .upload("bucket", "empty", &mut tokio::io::empty())
            .await
            .unwrap();

        assert_eq!(output.bytes, 0);
        assert_eq!(store.puts.lock().unwrap()[0].1.len(), 0);
    }

    #[tokio::test]
    async fn test_large_stream_uses_ordered_multipart() {
        let store = Arc::new(FakeStore::default());
        let uploader = Uploader::new(Arc::clone(&store), options(1000, 3));
        let data = input(4500);

        let output = uploader
            .upload("bucket", "large", &mut data.as_slice())
            .await
            .unwrap();

        assert_eq!(output.bytes, 4500);
        assert_eq!(output.parts, 5);
        assert_eq!(output.upload_id.as_deref(), Some("upload-1"));
        assert!(store.puts.lock().unwrap().is_empty());
        assert_eq!(*store.completed.lock().unwrap(), vec![vec![1, 2, 3, 4, 5]]);

        let mut parts = store.parts.lock().unwrap().clone();
        parts.sort_by_key(|(n, _)| *n);
        let joined: Vec<u8> = parts.iter().flat_map(|(_, b)| b.to_vec()).collect();
        assert_eq!(joined, data);
        assert_eq!(parts[4].1.len(), 500);
    }

    #[tokio::test]
    async fn test_exact_part_size_stream_is_multipart() {
        let store = Arc::new(FakeStore::default());
        let uploader = Uploader::new(Arc::clone(&store), options(1000, 2));
        let data = input(2000);

        let output = uploader
            .upload("bucket", "exact", &mut data.as_slice())
            .await
            .unwrap();

        assert_eq!(output.parts, 2);
        assert_eq!(*store.completed.lock().unwrap(), vec![vec![1, 2]]);
    }

    #[tokio::test]
    async fn test_failed_part_aborts_upload() {
        let store = Arc::new(FakeStore {
            fail_part: Some(2),
            ..Default::default()
        });
        let uploader = Uploader::new(Arc::clone(&store), options(1000, 2));
        let data = input(5000);

        let err = uploader
            .upload("bucket", "broken", &mut data.as_slice())
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Other(ref msg) if msg == "part 2 rejected"));
        assert_eq!(store.aborted.load(Ordering::SeqCst), 1);
        assert!(store.completed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_progress_bar_tracks_bytes() {
        let store = Arc::new(FakeStore::default());
        let pb = ProgressBar::hidden();
        let uploader =
            Uploader::new(Arc::clone(&store), options(1000, 2)).with_progress(pb.clone());
        let data = input(2500);

        uploader
            .upload("bucket", "tracked", &mut data.as_slice())
            .await
            .unwrap();

        assert_eq!(pb.position(), 2500);
    }
}
