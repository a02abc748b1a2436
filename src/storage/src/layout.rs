//! Object key layout shared by upload, retention and restore tooling:
//!
//! ```text
//! {prefix}/{project}/{dataset}/{project}-{dataset}-{timestamp}.tar.gz
//! {prefix}/{project}/{dataset}/{project}-{dataset}-{timestamp}.tar.gz.sha256
//! ```
//!
//! The timestamp is ISO-8601 UTC with millisecond precision, with `:` and `.`
//! replaced by `-` so it is safe in file names and URLs. An empty prefix
//! drops the leading segment.

use std::fmt;

use chrono::{DateTime, Utc};

pub const ARCHIVE_EXTENSION: &str = ".tar.gz";
pub const SIDECAR_EXTENSION: &str = ".sha256";

/// Timestamp token for `at`, e.g. `2024-03-01T02-00-00-000Z`.
pub fn timestamp_token(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
        .replace([':', '.'], "-")
}

/// Sidecar checksum key for an archive key.
pub fn sidecar_key(key: &str) -> String {
    format!("{key}{SIDECAR_EXTENSION}")
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackupKey {
    prefix: String,
    project_id: String,
    dataset: String,
    timestamp: String,
}

impl BackupKey {
    pub fn new(prefix: &str, project_id: &str, dataset: &str, at: DateTime<Utc>) -> Self {
        Self {
            prefix: prefix.trim_matches('/').to_string(),
            project_id: project_id.to_string(),
            dataset: dataset.to_string(),
            timestamp: timestamp_token(at),
        }
    }

    /// Listing prefix holding every backup of one project dataset.
    pub fn dataset_prefix(prefix: &str, project_id: &str, dataset: &str) -> String {
        let prefix = prefix.trim_matches('/');
        if prefix.is_empty() {
            format!("{project_id}/{dataset}")
        } else {
            format!("{prefix}/{project_id}/{dataset}")
        }
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// `{project}-{dataset}-{timestamp}`; also names the directory packed
    /// into the archive.
    pub fn stem(&self) -> String {
        format!("{}-{}-{}", self.project_id, self.dataset, self.timestamp)
    }

    pub fn file_name(&self) -> String {
        format!("{}{ARCHIVE_EXTENSION}", self.stem())
    }

    pub fn object_key(&self) -> String {
        format!(
            "{}/{}",
            Self::dataset_prefix(&self.prefix, &self.project_id, &self.dataset),
            self.file_name()
        )
    }

    pub fn sidecar_key(&self) -> String {
        sidecar_key(&self.object_key())
    }
}

impl fmt::Display for BackupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.object_key())
    }
}
