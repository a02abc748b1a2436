//! Dataset export: pulls every record of a dataset (and optionally its
//! binary assets) into a local directory.

pub mod assets;
pub mod download;
pub mod error;
pub mod http;
pub mod records;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use common::Secret;
use common::config::Configuration;

pub use assets::AssetReference;
pub use download::{AssetOutcome, AssetSummary};
pub use error::ExportError;
pub use http::HttpExporter;

/// Record file written into the export directory.
pub const DOCUMENTS_FILE: &str = "data.ndjson";

/// Subdirectory holding downloaded assets.
pub const ASSETS_DIR: &str = "assets";

#[derive(Clone, Debug)]
pub struct ExportRequest {
    pub project_id: String,
    pub dataset: String,
    pub token: Secret,
    pub include_drafts: bool,
    pub include_assets: bool,
    pub asset_concurrency: usize,
}

impl ExportRequest {
    pub fn from_config(config: &Configuration) -> Self {
        Self {
            project_id: config.source.project_id.clone(),
            dataset: config.source.dataset.clone(),
            token: config.source.token.clone(),
            include_drafts: config.backup.include_drafts,
            include_assets: config.backup.include_assets,
            asset_concurrency: config.backup.asset_concurrency,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExportSummary {
    pub documents_path: PathBuf,
    /// Present when assets were requested, even if none were referenced.
    pub assets_dir: Option<PathBuf>,
    pub documents: usize,
    pub drafts_skipped: usize,
    /// Size of the record file.
    pub bytes: u64,
    pub assets: AssetSummary,
}

/// Produces a self-contained export of one dataset under `out_dir`.
#[async_trait]
pub trait DatasetExporter: Send + Sync {
    async fn export(
        &self,
        request: &ExportRequest,
        out_dir: &Path,
    ) -> Result<ExportSummary, ExportError>;
}
