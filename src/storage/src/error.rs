use std::path::PathBuf;

use common::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage is not configured: {name} is missing")]
    Config { name: &'static str },

    #[error("failed to build storage client: {0}")]
    Client(#[source] object_store::Error),

    /// Carries enough context to diagnose a failed transfer from the log line
    /// alone.
    #[error("{operation} of {file} ({size}) to {bucket}/{key} failed: {source}")]
    Transfer {
        operation: &'static str,
        file: String,
        size: String,
        bucket: String,
        key: String,
        #[source]
        source: object_store::Error,
    },

    #[error(
        "upload verification failed for {key}: expected {expected} bytes, remote object has {actual}"
    )]
    UploadVerification {
        key: String,
        expected: u64,
        actual: u64,
    },

    #[error("failed to list {prefix}: {source}")]
    List {
        prefix: String,
        #[source]
        source: object_store::Error,
    },

    #[error("failed to delete {failed} of {total} objects: {}", keys.join(", "))]
    PartialDelete {
        failed: usize,
        total: usize,
        keys: Vec<String>,
    },

    #[error("remote object {key} has an empty body")]
    EmptyBody { key: String },

    #[error("failed to download {key}: {source}")]
    Download {
        key: String,
        #[source]
        source: object_store::Error,
    },

    #[error("local file error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::Config { .. } | StorageError::Client(_) => ErrorKind::Config,
            StorageError::Transfer { .. }
            | StorageError::List { .. }
            | StorageError::Download { .. } => ErrorKind::Transport,
            StorageError::UploadVerification { .. } => ErrorKind::Verification,
            StorageError::PartialDelete { .. } => ErrorKind::PartialFailure,
            StorageError::EmptyBody { .. } => ErrorKind::EmptyResult,
            StorageError::Io { .. } => ErrorKind::Io,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::Transfer { source, .. }
            | StorageError::List { source, .. }
            | StorageError::Download { source, .. } => is_transient(source),
            StorageError::UploadVerification { .. } => true,
            StorageError::Config { .. }
            | StorageError::Client(_)
            | StorageError::PartialDelete { .. }
            | StorageError::EmptyBody { .. }
            | StorageError::Io { .. } => false,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| StorageError::Io { path, source }
    }
}

/// Credential and missing-object failures do not heal on their own.
fn is_transient(error: &object_store::Error) -> bool {
    !matches!(
        error,
        object_store::Error::NotFound { .. }
            | object_store::Error::PermissionDenied { .. }
            | object_store::Error::Unauthenticated { .. }
            | object_store::Error::NotImplemented
            | object_store::Error::UnknownConfigurationKey { .. }
    )
}
