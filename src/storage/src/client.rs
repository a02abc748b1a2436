use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::config::StorageConfig;
use common::format::human_bytes;
use futures::{StreamExt, TryStreamExt};
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload, WriteMultipart};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use crate::error::StorageError;
use crate::layout::ARCHIVE_EXTENSION;

/// Files at or above this size are sent as multipart uploads.
pub const MULTIPART_THRESHOLD: u64 = 100 * 1024 * 1024;
pub const PART_SIZE: usize = 10 * 1024 * 1024;
pub const MAX_CONCURRENT_PARTS: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferSettings {
    pub multipart_threshold: u64,
    pub part_size: usize,
    pub max_concurrent_parts: usize,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            multipart_threshold: MULTIPART_THRESHOLD,
            part_size: PART_SIZE,
            max_concurrent_parts: MAX_CONCURRENT_PARTS,
        }
    }
}

/// One archive found by [`StorageClient::list`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteBackupEntry {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadReceipt {
    pub key: String,
    /// Size confirmed by the metadata read-back.
    pub size: u64,
    pub multipart: bool,
}

/// Remote object storage for backup archives.
#[derive(Clone, Debug)]
pub struct StorageClient {
    store: Arc<dyn ObjectStore>,
    config: StorageConfig,
    transfer: TransferSettings,
}

impl StorageClient {
    /// Builds the S3-compatible store described by `config`.
    pub fn connect(config: StorageConfig) -> Result<Self, StorageError> {
        if let Some(name) = config.missing_setting() {
            return Err(StorageError::Config { name });
        }

        let endpoint = config.endpoint();
        let store = AmazonS3Builder::new()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region)
            .with_endpoint(&endpoint)
            .with_access_key_id(config.access_key_id.expose())
            .with_secret_access_key(config.secret_access_key.expose())
            // R2 and MinIO expect path-style URLs
            .with_virtual_hosted_style_request(false)
            .with_allow_http(endpoint.starts_with("http://"))
            .build()
            .map_err(StorageError::Client)?;

        tracing::debug!(bucket = %config.bucket, %endpoint, "connected object store");
        Ok(Self::with_store(Arc::new(store), config))
    }

    pub fn with_store(store: Arc<dyn ObjectStore>, config: StorageConfig) -> Self {
        Self {
            store,
            config,
            transfer: TransferSettings::default(),
        }
    }

    pub fn with_transfer_settings(mut self, transfer: TransferSettings) -> Self {
        self.transfer = transfer;
        self
    }

    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }

    fn ensure_configured(&self) -> Result<(), StorageError> {
        match self.config.missing_setting() {
            Some(name) => Err(StorageError::Config { name }),
            None => Ok(()),
        }
    }

    /// Uploads `local_path` to `key` and confirms the remote size matches.
    /// An object whose remote size does not match is removed again before
    /// [`StorageError::UploadVerification`] is returned.
    pub async fn upload(
        &self,
        local_path: &Path,
        key: &str,
    ) -> Result<UploadReceipt, StorageError> {
        self.ensure_configured()?;

        let size = tokio::fs::metadata(local_path)
            .await
            .map_err(StorageError::io(local_path))?
            .len();
        let location = ObjectPath::from(key);
        let multipart = size >= self.transfer.multipart_threshold;

        let transfer_error = |source| StorageError::Transfer {
            operation: "upload",
            file: local_path.display().to_string(),
            size: human_bytes(size),
            bucket: self.config.bucket.clone(),
            key: key.to_string(),
            source,
        };

        tracing::info!(
            file = %local_path.display(),
            bucket = %self.bucket(),
            key,
            size = %human_bytes(size),
            multipart,
            "uploading object"
        );

        if multipart {
            self.upload_multipart(local_path, &location, size)
                .await?
                .map_err(transfer_error)?;
        } else {
            let data = tokio::fs::read(local_path)
                .await
                .map_err(StorageError::io(local_path))?;
            self.store
                .put(&location, PutPayload::from(data))
                .await
                .map_err(transfer_error)?;
        }

        let meta = self.store.head(&location).await.map_err(|source| {
            StorageError::Transfer {
                operation: "verify",
                file: local_path.display().to_string(),
                size: human_bytes(size),
                bucket: self.config.bucket.clone(),
                key: key.to_string(),
                source,
            }
        })?;
        if meta.size != size {
            self.discard(&location).await;
            return Err(StorageError::UploadVerification {
                key: key.to_string(),
                expected: size,
                actual: meta.size,
            });
        }

        tracing::info!(key, size = %human_bytes(size), "upload verified");
        Ok(UploadReceipt {
            key: key.to_string(),
            size,
            multipart,
        })
    }

    /// Best-effort removal of an object that failed verification so it is
    /// never listed as a backup.
    async fn discard(&self, location: &ObjectPath) {
        match self.store.delete(location).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => {
                tracing::warn!(key = %location, "removed unverified object")
            }
            Err(error) => {
                tracing::warn!(key = %location, %error, "failed to remove unverified object")
            }
        }
    }

    /// The outer result carries local read failures, the inner one the
    /// store's.
    async fn upload_multipart(
        &self,
        local_path: &Path,
        location: &ObjectPath,
        total: u64,
    ) -> Result<Result<(), object_store::Error>, StorageError> {
        let mut file = tokio::fs::File::open(local_path)
            .await
            .map_err(StorageError::io(local_path))?;
        let upload = match self.store.put_multipart(location).await {
            Ok(upload) => upload,
            Err(e) => return Ok(Err(e)),
        };
        let mut writer = WriteMultipart::new_with_chunk_size(upload, self.transfer.part_size);
        let mut buf = vec![0u8; self.transfer.part_size];
        let mut sent = 0u64;

        loop {
            let read = match fill(&mut file, &mut buf).await {
                Ok(read) => read,
                Err(source) => {
                    let _ = writer.abort().await;
                    return Err(StorageError::Io {
                        path: local_path.to_path_buf(),
                        source,
                    });
                }
            };
            if read == 0 {
                break;
            }

            if let Err(e) = writer
                .wait_for_capacity(self.transfer.max_concurrent_parts)
                .await
            {
                let _ = writer.abort().await;
                return Ok(Err(e));
            }
            writer.write(&buf[..read]);
            sent += read as u64;

            tracing::info!(
                key = %location,
                sent = %human_bytes(sent),
                total = %human_bytes(total),
                percent = sent * 100 / total.max(1),
                "multipart upload progress"
            );
        }

        Ok(writer.finish().await.map(|_| ()))
    }

    /// Archives under `prefix`, newest first. Sidecars and unrelated objects
    /// are left out; a prefix with no objects yields an empty list.
    pub async fn list(&self, prefix: &str) -> Result<Vec<RemoteBackupEntry>, StorageError> {
        self.ensure_configured()?;

        let location = ObjectPath::from(prefix);
        let objects: Vec<_> = self
            .store
            .list(Some(&location))
            .try_collect()
            .await
            .map_err(|source| StorageError::List {
                prefix: prefix.to_string(),
                source,
            })?;

        let mut entries: Vec<RemoteBackupEntry> = objects
            .into_iter()
            .filter(|meta| meta.location.as_ref().ends_with(ARCHIVE_EXTENSION))
            .map(|meta| RemoteBackupEntry {
                key: meta.location.to_string(),
                size: meta.size,
                last_modified: meta.last_modified,
            })
            .collect();
        entries.sort_by(|a, b| {
            b.last_modified
                .cmp(&a.last_modified)
                .then_with(|| b.key.cmp(&a.key))
        });

        tracing::debug!(prefix, count = entries.len(), "listed backups");
        Ok(entries)
    }

    /// Deletes `keys` in one batch. Objects that are already gone count as
    /// deleted; any other per-key failure is collected into
    /// [`StorageError::PartialDelete`].
    pub async fn delete_batch(&self, keys: &[String]) -> Result<usize, StorageError> {
        self.ensure_configured()?;
        if keys.is_empty() {
            return Ok(0);
        }

        let locations = futures::stream::iter(
            keys.iter()
                .map(|key| Ok::<_, object_store::Error>(ObjectPath::from(key.as_str())))
                .collect::<Vec<_>>(),
        )
        .boxed();
        // Results arrive in request order.
        let results: Vec<_> = self.store.delete_stream(locations).collect().await;

        let mut failed = Vec::new();
        for (index, key) in keys.iter().enumerate() {
            match results.get(index) {
                Some(Ok(_)) | Some(Err(object_store::Error::NotFound { .. })) => {}
                Some(Err(error)) => {
                    tracing::warn!(key, %error, "failed to delete object");
                    failed.push(key.clone());
                }
                None => {
                    tracing::warn!(key, "no delete result returned for object");
                    failed.push(key.clone());
                }
            }
        }

        if !failed.is_empty() {
            return Err(StorageError::PartialDelete {
                failed: failed.len(),
                total: keys.len(),
                keys: failed,
            });
        }

        tracing::info!(count = keys.len(), "deleted objects");
        Ok(keys.len())
    }

    /// Streams `key` into `dest` and returns the number of bytes written.
    pub async fn download(&self, key: &str, dest: &Path) -> Result<u64, StorageError> {
        self.ensure_configured()?;

        let download_error = |source| StorageError::Download {
            key: key.to_string(),
            source,
        };
        let result = self
            .store
            .get(&ObjectPath::from(key))
            .await
            .map_err(download_error)?;
        let mut body = result.into_stream();

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(StorageError::io(dest))?;
        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(download_error)?;
            file.write_all(&chunk)
                .await
                .map_err(StorageError::io(dest))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(StorageError::io(dest))?;

        if written == 0 {
            let _ = tokio::fs::remove_file(dest).await;
            return Err(StorageError::EmptyBody {
                key: key.to_string(),
            });
        }

        tracing::debug!(key, bytes = written, "downloaded object");
        Ok(written)
    }
}

/// Reads until `buf` is full or the reader is exhausted.
async fn fill<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let read = reader.read(&mut buf[filled..]).await?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(filled)
}
