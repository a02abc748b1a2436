//! Runs one backup: export, archive, checksum, upload, prune, notify,
//! clean up. Stages run strictly in that order and the first failure ends
//! the run.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use common::checksum::{ChecksumAlgorithm, ChecksumRecord};
use common::config::{ConfigError, Configuration};
use common::retry::{RetryError, retry, retry_with_jitter};
use common::{Redactor, RetryHooks, RetryPolicy};
use exporter::{DatasetExporter, ExportError, ExportRequest, HttpExporter};
use storage::{BackupKey, StorageClient, StorageError};
use tempfile::TempDir;

use crate::archive::create_archive;
use crate::error::{BackupError, Stage};
use crate::notifier::{Notification, Notifier};
use crate::retention::RetentionPolicy;
use crate::run::{BackupRun, Outcome};

const STAGING_PREFIX: &str = "cms-backup-";

/// Business options of a run, derived from validated configuration.
#[derive(Clone, Debug)]
pub struct BackupOptions {
    pub request: ExportRequest,
    pub storage_prefix: String,
    pub retention: RetentionPolicy,
    pub checksum: ChecksumAlgorithm,
    /// Parent of the staging directory; the system temp dir when unset.
    pub staging_root: Option<PathBuf>,
}

impl BackupOptions {
    pub fn from_config(config: &Configuration) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            request: ExportRequest::from_config(config),
            storage_prefix: config.backup.storage_prefix.clone(),
            retention: RetentionPolicy::from_config(&config.backup),
            checksum: ChecksumAlgorithm::default(),
            staging_root: None,
        })
    }

    pub fn with_staging_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.staging_root = Some(root.into());
        self
    }
}

/// Scratch directory owned by one run. Removed by [`StagingDir::cleanup`],
/// or on drop if the run unwinds.
pub struct StagingDir {
    dir: TempDir,
}

impl StagingDir {
    pub fn create(root: Option<&Path>) -> std::io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(STAGING_PREFIX);
        let dir = match root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };
        tracing::debug!(path = %dir.path().display(), "created staging directory");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Removal failures are logged, never raised.
    pub fn cleanup(self) {
        let path = self.dir.path().to_path_buf();
        match self.dir.close() {
            Ok(()) => tracing::debug!(path = %path.display(), "removed staging directory"),
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "failed to remove staging directory")
            }
        }
    }
}

pub struct BackupOrchestrator {
    options: BackupOptions,
    exporter: Arc<dyn DatasetExporter>,
    storage: StorageClient,
    notifier: Notifier,
    retry: RetryPolicy,
}

impl BackupOrchestrator {
    pub fn new(
        options: BackupOptions,
        exporter: Arc<dyn DatasetExporter>,
        storage: StorageClient,
        notifier: Notifier,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            options,
            exporter,
            storage,
            notifier,
            retry,
        }
    }

    /// Validates `config` and builds the HTTP export, storage and webhook
    /// clients from it.
    pub fn from_config(config: &Configuration, redactor: Redactor) -> Result<Self, BackupError> {
        let options = BackupOptions::from_config(config)?;
        let notifier = Notifier::new(&config.notify, redactor)
            .map_err(|error| BackupError::client("webhook", error))?;
        let exporter = HttpExporter::new(&config.source)
            .map_err(|error| BackupError::client("export", error))?;
        let storage = StorageClient::connect(config.storage.clone())
            .map_err(|error| BackupError::client("storage", error))?;

        Ok(Self::new(
            options,
            Arc::new(exporter),
            storage,
            notifier,
            config.retry.clone(),
        ))
    }

    /// Executes the pipeline once. A failure is reported to the notifier
    /// before it is returned; the staging directory is removed either way.
    pub async fn run(&self) -> Result<BackupRun, BackupError> {
        let started = Instant::now();
        let request = &self.options.request;
        let key = BackupKey::new(
            &self.options.storage_prefix,
            &request.project_id,
            &request.dataset,
            Utc::now(),
        );
        let mut run = BackupRun::new(&request.project_id, &request.dataset, key);

        tracing::info!(
            project_id = %request.project_id,
            dataset = %request.dataset,
            timestamp = run.timestamp(),
            "starting backup"
        );

        let (staging, result) = match StagingDir::create(self.options.staging_root.as_deref()) {
            Ok(staging) => {
                run.work_dir = Some(staging.path().to_path_buf());
                let result = self.execute(&mut run, staging.path()).await;
                (Some(staging), result)
            }
            Err(error) => (None, Err(BackupError::Staging(error))),
        };

        run.duration = started.elapsed();
        run.outcome = match &result {
            Ok(()) => Outcome::Success,
            Err(error) => Outcome::Failure {
                stage: error.stage(),
                error: error.to_string(),
            },
        };

        self.notifier.notify(&run.notification()).await;

        if let Some(staging) = staging {
            staging.cleanup();
        }

        result?;
        tracing::info!(
            key = run.object_key.as_deref().unwrap_or_default(),
            size = run.size.unwrap_or_default(),
            duration = %common::format::human_duration(run.duration),
            pruned = run.pruned.len(),
            "backup finished"
        );
        Ok(run)
    }

    async fn execute(&self, run: &mut BackupRun, work_dir: &Path) -> Result<(), BackupError> {
        let request = &self.options.request;
        let stem = run.key.stem();
        let export_dir = work_dir.join(&stem);

        let summary = self
            .with_retry(Stage::Export, ExportError::is_retryable, || {
                self.exporter.export(request, &export_dir)
            })
            .await?;
        run.export = Some(summary);

        let archive_path = work_dir.join(run.key.file_name());
        let archive = create_archive(work_dir, &stem, &archive_path).await?;
        run.archive_path = Some(archive.path.clone());

        let record = ChecksumRecord::compute(&archive.path, self.options.checksum).await?;
        let sidecar_path = record.write_sidecar(&archive.path).await?;
        tracing::info!(
            algorithm = %record.algorithm,
            digest = %record.hex,
            "archive checksum computed"
        );
        run.checksum = Some(record.hex);

        let object_key = run.key.object_key();
        let receipt = self
            .with_retry(Stage::Upload, StorageError::is_retryable, || {
                self.storage.upload(&archive.path, &object_key)
            })
            .await
            .map_err(BackupError::Upload)?;
        run.size = Some(receipt.size);
        run.object_key = Some(receipt.key);

        let sidecar_key = run.key.sidecar_key();
        let sidecar = self
            .with_retry(Stage::Upload, StorageError::is_retryable, || {
                self.storage.upload(&sidecar_path, &sidecar_key)
            })
            .await;
        if let Err(error) = sidecar {
            // An archive without its sidecar must not count as a backup.
            self.remove_archive(&object_key).await;
            run.size = None;
            run.object_key = None;
            return Err(BackupError::Upload(error));
        }

        let prefix = BackupKey::dataset_prefix(
            &self.options.storage_prefix,
            &request.project_id,
            &request.dataset,
        );
        run.pruned = self
            .with_retry(Stage::Retention, StorageError::is_retryable, || {
                self.prune(&prefix)
            })
            .await
            .map_err(BackupError::Retention)?;

        Ok(())
    }

    /// Lists the dataset's backups and deletes those outside the retention
    /// policy. Returns the deleted keys.
    async fn prune(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let entries = self.storage.list(prefix).await?;
        let decision = self.options.retention.apply(&entries, Utc::now());
        if decision.is_empty() {
            tracing::info!(prefix, backups = entries.len(), "nothing to prune");
            return Ok(Vec::new());
        }

        let keys = decision.delete_keys();
        tracing::info!(
            prefix,
            keep = decision.keep.len(),
            delete = decision.delete.len(),
            "pruning old backups"
        );
        self.storage.delete_batch(&keys).await?;
        Ok(keys)
    }

    /// Best-effort; a failure is logged and the original error stands.
    async fn remove_archive(&self, key: &str) {
        match self.storage.delete_batch(&[key.to_string()]).await {
            Ok(_) => tracing::warn!(key, "removed archive uploaded without its sidecar"),
            Err(error) => {
                tracing::error!(key, %error, "failed to remove archive without its sidecar")
            }
        }
    }

    async fn with_retry<T, E, F, Fut>(
        &self,
        stage: Stage,
        is_retryable: fn(&E) -> bool,
        operation: F,
    ) -> Result<T, E>
    where
        E: std::error::Error + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_retries = self.retry.max_retries;
        let should_retry = |error: &E| is_retryable(error);
        let on_retry = |attempt: u32, error: &E, delay: Duration| {
            tracing::warn!(
                %stage,
                attempt,
                max_retries,
                delay = ?delay,
                %error,
                "stage failed; retrying"
            );
        };
        let hooks = RetryHooks::default()
            .should_retry(&should_retry)
            .on_retry(&on_retry);

        if self.retry.jitter {
            retry_with_jitter(&self.retry, hooks, operation)
                .await
                .map_err(RetryError::into_inner)
        } else {
            retry(&self.retry, hooks, operation).await
        }
    }
}

/// Logs a failed run with its stage and kind; the message is redacted.
pub fn log_failure(redactor: &Redactor, error: &BackupError) {
    tracing::error!(
        stage = %error.stage(),
        kind = %error.kind(),
        error = %redactor.redact(&error.to_string()),
        "backup failed"
    );
}

/// Logs and notifies a failure that happened before a run could start.
/// Without a usable webhook the failure is only logged.
pub async fn report_setup_failure(config: &Configuration, redactor: Redactor, error: &BackupError) {
    log_failure(&redactor, error);

    let notifier = match Notifier::new(&config.notify, redactor) {
        Ok(notifier) => notifier,
        Err(error) => {
            tracing::warn!(%error, "failed to build the webhook client");
            return;
        }
    };
    notifier
        .notify(&Notification::Failure {
            project_id: config.source.project_id.clone(),
            dataset: config.source.dataset.clone(),
            stage: error.stage().to_string(),
            error: error.to_string(),
            duration: Duration::ZERO,
        })
        .await;
}
