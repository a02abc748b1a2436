//! Backup pipeline for a hosted CMS dataset.
//!
//! A run exports the dataset, packs it into a `.tar.gz`, writes a SHA-256
//! sidecar, uploads both to object storage, prunes old backups and reports
//! the outcome to an optional webhook.

pub mod archive;
pub mod error;
pub mod notifier;
pub mod orchestrator;
pub mod retention;
pub mod run;

pub use archive::{ArchiveError, ArchiveSummary, create_archive};
pub use error::{BackupError, Stage};
pub use notifier::{Notification, Notifier, NotifyError};
pub use orchestrator::{
    BackupOptions, BackupOrchestrator, StagingDir, log_failure, report_setup_failure,
};
pub use retention::{RetentionDecision, RetentionPolicy};
pub use run::{BackupRun, Outcome};
