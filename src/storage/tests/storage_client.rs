use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use common::testing::TestConfigBuilder;
use futures::stream::BoxStream;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{
    GetOptions, GetResult, ListResult, MultipartUpload, ObjectMeta, ObjectStore, PutMultipartOpts,
    PutOptions, PutPayload, PutResult,
};
use storage::{BackupKey, StorageClient, StorageError, TransferSettings, sidecar_key};

/// In-memory store that can misreport sizes and fail selected deletes.
#[derive(Debug, Default)]
struct FaultyStore {
    inner: InMemory,
    failing_deletes: HashSet<String>,
    reported_size: Option<u64>,
}

impl fmt::Display for FaultyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FaultyStore")
    }
}

#[async_trait]
impl ObjectStore for FaultyStore {
    async fn put_opts(
        &self,
        location: &Path,
        payload: PutPayload,
        opts: PutOptions,
    ) -> object_store::Result<PutResult> {
        self.inner.put_opts(location, payload, opts).await
    }

    async fn put_multipart_opts(
        &self,
        location: &Path,
        opts: PutMultipartOpts,
    ) -> object_store::Result<Box<dyn MultipartUpload>> {
        self.inner.put_multipart_opts(location, opts).await
    }

    async fn get_opts(
        &self,
        location: &Path,
        options: GetOptions,
    ) -> object_store::Result<GetResult> {
        self.inner.get_opts(location, options).await
    }

    async fn head(&self, location: &Path) -> object_store::Result<ObjectMeta> {
        let mut meta = self.inner.head(location).await?;
        if let Some(size) = self.reported_size {
            meta.size = size;
        }
        Ok(meta)
    }

    async fn delete(&self, location: &Path) -> object_store::Result<()> {
        if self.failing_deletes.contains(location.as_ref()) {
            return Err(object_store::Error::Generic {
                store: "faulty",
                source: "simulated delete failure".into(),
            });
        }
        self.inner.delete(location).await
    }

    fn list(&self, prefix: Option<&Path>) -> BoxStream<'static, object_store::Result<ObjectMeta>> {
        self.inner.list(prefix)
    }

    async fn list_with_delimiter(
        &self,
        prefix: Option<&Path>,
    ) -> object_store::Result<ListResult> {
        self.inner.list_with_delimiter(prefix).await
    }

    async fn copy(&self, from: &Path, to: &Path) -> object_store::Result<()> {
        self.inner.copy(from, to).await
    }

    async fn copy_if_not_exists(&self, from: &Path, to: &Path) -> object_store::Result<()> {
        self.inner.copy_if_not_exists(from, to).await
    }
}

fn client_over(store: Arc<dyn ObjectStore>) -> StorageClient {
    StorageClient::with_store(store, TestConfigBuilder::new().build().storage)
}

async fn put(store: &dyn ObjectStore, key: &str, data: &'static [u8]) -> Result<()> {
    store
        .put(&Path::from(key), PutPayload::from(Bytes::from_static(data)))
        .await?;
    Ok(())
}

fn archive_key(day: u32) -> String {
    use chrono::TimeZone;
    let at = chrono::Utc
        .with_ymd_and_hms(2024, 3, day, 2, 0, 0)
        .single()
        .expect("valid date");
    BackupKey::new("sanity", "proj", "production", at).object_key()
}

#[tokio::test]
async fn test_upload_round_trip_through_download() -> Result<()> {
    let client = client_over(Arc::new(InMemory::new()));
    let dir = tempfile::tempdir()?;
    let local = dir.path().join("backup.tar.gz");
    std::fs::write(&local, b"compressed archive bytes")?;
    let key = archive_key(1);

    let receipt = client.upload(&local, &key).await?;
    assert_eq!(receipt.size, 24);

    let restored = dir.path().join("restored.tar.gz");
    let bytes = client.download(&key, &restored).await?;
    assert_eq!(bytes, 24);
    assert_eq!(std::fs::read(&restored)?, b"compressed archive bytes");
    Ok(())
}

#[tokio::test]
async fn test_large_files_use_multipart_upload() -> Result<()> {
    let store = Arc::new(InMemory::new());
    let client = client_over(store.clone()).with_transfer_settings(TransferSettings {
        multipart_threshold: 16,
        part_size: 8,
        max_concurrent_parts: 2,
    });
    let dir = tempfile::tempdir()?;
    let local = dir.path().join("big.tar.gz");
    let data: Vec<u8> = (0..50u8).collect();
    std::fs::write(&local, &data)?;

    let receipt = client.upload(&local, "sanity/big.tar.gz").await?;

    assert!(receipt.multipart);
    assert_eq!(receipt.size, 50);
    let stored = store.get(&Path::from("sanity/big.tar.gz")).await?.bytes().await?;
    assert_eq!(&stored[..], &data[..]);
    Ok(())
}

#[tokio::test]
async fn test_size_mismatch_fails_verification() -> Result<()> {
    let store = Arc::new(FaultyStore {
        reported_size: Some(3),
        ..Default::default()
    });
    let client = client_over(store.clone());
    let dir = tempfile::tempdir()?;
    let local = dir.path().join("backup.tar.gz");
    std::fs::write(&local, b"0123456789")?;
    let key = archive_key(1);

    let err = client.upload(&local, &key).await.unwrap_err();

    match &err {
        StorageError::UploadVerification {
            expected, actual, ..
        } => {
            assert_eq!(*expected, 10);
            assert_eq!(*actual, 3);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.is_retryable());

    // The mismatched object is not left behind for retention to count.
    assert!(matches!(
        store.inner.head(&Path::from(key.as_str())).await,
        Err(object_store::Error::NotFound { .. })
    ));
    let prefix = BackupKey::dataset_prefix("sanity", "proj", "production");
    assert!(client.list(&prefix).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_size_mismatch_is_reported_when_removal_fails() -> Result<()> {
    let key = archive_key(2);
    let store = Arc::new(FaultyStore {
        reported_size: Some(3),
        failing_deletes: HashSet::from([key.clone()]),
        ..Default::default()
    });
    let client = client_over(store.clone());
    let dir = tempfile::tempdir()?;
    let local = dir.path().join("backup.tar.gz");
    std::fs::write(&local, b"0123456789")?;

    let err = client.upload(&local, &key).await.unwrap_err();

    assert!(matches!(err, StorageError::UploadVerification { .. }));
    Ok(())
}

#[tokio::test]
async fn test_missing_bucket_fails_before_any_request() -> Result<()> {
    let store = Arc::new(InMemory::new());
    let config = TestConfigBuilder::new().without_bucket().build().storage;
    let client = StorageClient::with_store(store.clone(), config);
    let dir = tempfile::tempdir()?;
    let local = dir.path().join("backup.tar.gz");
    std::fs::write(&local, b"data")?;

    let err = client.upload(&local, "k.tar.gz").await.unwrap_err();

    assert!(matches!(
        err,
        StorageError::Config {
            name: "STORAGE_BUCKET"
        }
    ));
    assert!(store.head(&Path::from("k.tar.gz")).await.is_err());
    let config = TestConfigBuilder::new().without_bucket().build().storage;
    assert!(StorageClient::connect(config).is_err());
    Ok(())
}

#[tokio::test]
async fn test_list_returns_archives_newest_first() -> Result<()> {
    let store = Arc::new(InMemory::new());
    for day in [3, 1, 2] {
        let key = archive_key(day);
        put(store.as_ref(), &key, b"archive").await?;
        put(store.as_ref(), &sidecar_key(&key), b"hex  name\n").await?;
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }
    put(store.as_ref(), "sanity/proj/production/notes.txt", b"x").await?;
    let other_dataset = BackupKey::new("sanity", "proj", "staging", chrono::Utc::now());
    put(store.as_ref(), &other_dataset.object_key(), b"x").await?;
    let client = client_over(store);

    let entries = client
        .list(&BackupKey::dataset_prefix("sanity", "proj", "production"))
        .await?;

    let keys: Vec<_> = entries.iter().map(|e| e.key.as_str()).collect();
    // Insertion order decides last-modified.
    assert_eq!(keys, vec![archive_key(2), archive_key(1), archive_key(3)]);
    assert!(entries.iter().all(|e| e.size == 7));
    assert!(entries.windows(2).all(|w| w[0].last_modified >= w[1].last_modified));

    assert!(client.list("sanity/unknown/dataset").await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_delete_batch_reports_partial_failure() -> Result<()> {
    let keys: Vec<String> = (1..=4).map(archive_key).collect();
    let store = Arc::new(FaultyStore {
        failing_deletes: HashSet::from([keys[1].clone()]),
        ..Default::default()
    });
    for key in &keys {
        put(store.as_ref(), key, b"archive").await?;
    }
    let client = client_over(store.clone());

    let err = client.delete_batch(&keys).await.unwrap_err();

    match err {
        StorageError::PartialDelete {
            failed,
            total,
            keys: failed_keys,
        } => {
            assert_eq!(failed, 1);
            assert_eq!(total, 4);
            assert_eq!(failed_keys, vec![keys[1].clone()]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    for (index, key) in keys.iter().enumerate() {
        let exists = store.head(&Path::from(key.as_str())).await.is_ok();
        assert_eq!(exists, index == 1, "{key}");
    }
    Ok(())
}

#[tokio::test]
async fn test_delete_batch_ignores_missing_objects() -> Result<()> {
    let store = Arc::new(InMemory::new());
    let key = archive_key(1);
    put(store.as_ref(), &key, b"archive").await?;
    let client = client_over(store);

    let deleted = client
        .delete_batch(&[key.clone(), sidecar_key(&key)])
        .await?;

    assert_eq!(deleted, 2);
    assert_eq!(client.delete_batch(&[]).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_download_of_empty_object_is_an_error() -> Result<()> {
    let store = Arc::new(InMemory::new());
    put(store.as_ref(), "sanity/empty.tar.gz", b"").await?;
    let client = client_over(store);
    let dir = tempfile::tempdir()?;
    let dest = dir.path().join("empty.tar.gz");

    let err = client.download("sanity/empty.tar.gz", &dest).await.unwrap_err();
    assert!(matches!(err, StorageError::EmptyBody { .. }));
    assert!(!dest.exists());

    let err = client.download("sanity/missing.tar.gz", &dest).await.unwrap_err();
    assert!(matches!(err, StorageError::Download { .. }));
    assert!(!err.is_retryable());
    Ok(())
}
