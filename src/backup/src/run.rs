use std::path::PathBuf;
use std::time::Duration;

use exporter::ExportSummary;
use storage::BackupKey;

use crate::error::Stage;
use crate::notifier::Notification;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Running,
    Success,
    Failure { stage: Stage, error: String },
}

/// State of one pipeline execution. Each stage fills in its result.
#[derive(Clone, Debug)]
pub struct BackupRun {
    pub project_id: String,
    pub dataset: String,
    pub key: BackupKey,
    pub work_dir: Option<PathBuf>,
    pub export: Option<ExportSummary>,
    pub archive_path: Option<PathBuf>,
    pub checksum: Option<String>,
    /// Archive size in bytes, as verified after upload.
    pub size: Option<u64>,
    /// Set once the archive upload has been verified.
    pub object_key: Option<String>,
    /// Keys removed by retention pruning, sidecars included.
    pub pruned: Vec<String>,
    pub outcome: Outcome,
    pub duration: Duration,
}

impl BackupRun {
    pub fn new(project_id: &str, dataset: &str, key: BackupKey) -> Self {
        Self {
            project_id: project_id.to_string(),
            dataset: dataset.to_string(),
            key,
            work_dir: None,
            export: None,
            archive_path: None,
            checksum: None,
            size: None,
            object_key: None,
            pruned: Vec::new(),
            outcome: Outcome::Running,
            duration: Duration::ZERO,
        }
    }

    pub fn timestamp(&self) -> &str {
        self.key.timestamp()
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }

    pub fn notification(&self) -> Notification {
        match &self.outcome {
            Outcome::Failure { stage, error } => Notification::Failure {
                project_id: self.project_id.clone(),
                dataset: self.dataset.clone(),
                stage: stage.to_string(),
                error: error.clone(),
                duration: self.duration,
            },
            Outcome::Running | Outcome::Success => Notification::Success {
                project_id: self.project_id.clone(),
                dataset: self.dataset.clone(),
                object_key: self
                    .object_key
                    .clone()
                    .unwrap_or_else(|| self.key.object_key()),
                size: self.size.unwrap_or_default(),
                duration: self.duration,
            },
        }
    }

    /// The machine-readable lines printed on success.
    pub fn output_lines(&self) -> String {
        format!(
            "objectKey: {}\nobjectSize: {}\nbackupTimestamp: {}",
            self.object_key
                .clone()
                .unwrap_or_else(|| self.key.object_key()),
            self.size.unwrap_or_default(),
            self.timestamp()
        )
    }
}
