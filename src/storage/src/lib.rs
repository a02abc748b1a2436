//! Backup archive storage on S3-compatible object stores.

pub mod client;
pub mod error;
pub mod layout;

pub use client::{RemoteBackupEntry, StorageClient, TransferSettings, UploadReceipt};
pub use error::StorageError;
pub use layout::{BackupKey, sidecar_key};
