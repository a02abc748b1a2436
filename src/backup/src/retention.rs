//! Which remote backups to prune. Pure decision logic; the deletes are
//! issued by the orchestrator through the storage client.

use std::time::Duration;

use chrono::{DateTime, Utc};
use common::config::BackupConfig;
use storage::{RemoteBackupEntry, sidecar_key};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Keep the `n` most recent backups.
    KeepLatest(usize),
    /// Keep backups younger than the given age. The newest backup is always
    /// kept.
    MaxAge(Duration),
}

impl RetentionPolicy {
    pub fn from_config(config: &BackupConfig) -> Self {
        match config.retain_max_age {
            Some(max_age) => RetentionPolicy::MaxAge(max_age),
            None => RetentionPolicy::KeepLatest(config.retain_count),
        }
    }

    /// Partitions `entries` into kept and deleted backups. Entries are
    /// ordered newest first before the policy is applied.
    pub fn apply(&self, entries: &[RemoteBackupEntry], now: DateTime<Utc>) -> RetentionDecision {
        let mut sorted = entries.to_vec();
        sorted.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));

        let split = match *self {
            RetentionPolicy::KeepLatest(count) => count.min(sorted.len()),
            RetentionPolicy::MaxAge(max_age) => {
                let cutoff = chrono::Duration::from_std(max_age)
                    .ok()
                    .and_then(|age| now.checked_sub_signed(age));
                let young = match cutoff {
                    Some(cutoff) => sorted
                        .iter()
                        .take_while(|entry| entry.last_modified >= cutoff)
                        .count(),
                    None => sorted.len(),
                };
                young.max(1).min(sorted.len())
            }
        };

        let delete = sorted.split_off(split);
        RetentionDecision {
            keep: sorted,
            delete,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RetentionDecision {
    pub keep: Vec<RemoteBackupEntry>,
    pub delete: Vec<RemoteBackupEntry>,
}

impl RetentionDecision {
    /// Nothing to delete; no storage call is needed.
    pub fn is_empty(&self) -> bool {
        self.delete.is_empty()
    }

    /// Each pruned archive key followed by its checksum sidecar key. The
    /// sidecar is listed whether or not it exists remotely.
    pub fn delete_keys(&self) -> Vec<String> {
        self.delete
            .iter()
            .flat_map(|entry| [entry.key.clone(), sidecar_key(&entry.key)])
            .collect()
    }
}
