use std::fmt;

use common::ErrorKind;
use common::checksum::ChecksumError;
use common::config::ConfigError;
use exporter::ExportError;
use storage::StorageError;
use thiserror::Error;

use crate::archive::ArchiveError;

/// Pipeline stage a failure is attributed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Config,
    Staging,
    Export,
    Archive,
    Checksum,
    Upload,
    Retention,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Config => "config",
            Stage::Staging => "staging",
            Stage::Export => "export",
            Stage::Archive => "archive",
            Stage::Checksum => "checksum",
            Stage::Upload => "upload",
            Stage::Retention => "retention",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum BackupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{component} client setup failed: {source}")]
    Client {
        component: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("failed to create staging directory: {0}")]
    Staging(#[source] std::io::Error),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Checksum(#[from] ChecksumError),

    #[error(transparent)]
    Upload(StorageError),

    #[error(transparent)]
    Retention(StorageError),
}

impl BackupError {
    pub fn client(
        component: &'static str,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        BackupError::Client {
            component,
            source: Box::new(source),
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            BackupError::Config(_) | BackupError::Client { .. } => Stage::Config,
            BackupError::Staging(_) => Stage::Staging,
            BackupError::Export(_) => Stage::Export,
            BackupError::Archive(_) => Stage::Archive,
            BackupError::Checksum(_) => Stage::Checksum,
            BackupError::Upload(_) => Stage::Upload,
            BackupError::Retention(_) => Stage::Retention,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BackupError::Config(_) | BackupError::Client { .. } => ErrorKind::Config,
            BackupError::Staging(_) | BackupError::Checksum(_) => ErrorKind::Io,
            BackupError::Export(e) => e.kind(),
            BackupError::Archive(e) => e.kind(),
            BackupError::Upload(e) | BackupError::Retention(e) => e.kind(),
        }
    }
}
