use std::path::PathBuf;

use common::ErrorKind;
use thiserror::Error;

/// Upper bound on how much of an error response body is kept.
pub(crate) const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("export request to {endpoint} returned status {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("export transport error for {endpoint}: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("export of dataset {dataset} produced an empty record file at {}", path.display())]
    EmptyExport { dataset: String, path: PathBuf },

    #[error("failed to write export output {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to build export client: {0}")]
    Client(#[source] reqwest::Error),
}

impl ExportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExportError::Status { .. } | ExportError::Transport { .. } => ErrorKind::Transport,
            ExportError::EmptyExport { .. } => ErrorKind::EmptyResult,
            ExportError::Io { .. } => ErrorKind::Io,
            ExportError::Client(_) => ErrorKind::Config,
        }
    }

    /// Authentication and missing-dataset responses will not change on a
    /// retry; an empty export is treated the same way.
    pub fn is_retryable(&self) -> bool {
        match self {
            ExportError::Status { status, .. } => !matches!(status, 400 | 401 | 403 | 404),
            ExportError::Transport { .. } => true,
            ExportError::EmptyExport { .. } | ExportError::Io { .. } | ExportError::Client(_) => {
                false
            }
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| ExportError::Io { path, source }
    }
}

pub(crate) fn truncate_body(body: &str) -> String {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
