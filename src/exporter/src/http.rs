use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use common::config::SourceConfig;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::download::{AssetJob, AssetSummary, download_all};
use crate::error::{ExportError, truncate_body};
use crate::records::RecordFilter;
use crate::{ASSETS_DIR, DOCUMENTS_FILE, DatasetExporter, ExportRequest, ExportSummary};

/// Exporter backed by the CMS HTTP export endpoint and asset CDN.
#[derive(Clone, Debug)]
pub struct HttpExporter {
    client: reqwest::Client,
    api_base_url: String,
    cdn_base_url: String,
    api_version: String,
}

impl HttpExporter {
    pub fn new(config: &SourceConfig) -> Result<Self, ExportError> {
        Self::with_timeout(config, config.request_timeout)
    }

    pub fn with_timeout(config: &SourceConfig, timeout: Duration) -> Result<Self, ExportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("cms-backup/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ExportError::Client)?;

        Ok(Self {
            client,
            api_base_url: config.api_base_url().trim_end_matches('/').to_string(),
            cdn_base_url: config.cdn_base_url.trim_end_matches('/').to_string(),
            api_version: config.api_version.trim_start_matches('v').to_string(),
        })
    }

    pub fn export_url(&self, dataset: &str) -> String {
        format!(
            "{}/v{}/data/export/{dataset}",
            self.api_base_url, self.api_version
        )
    }

    async fn stream_records(
        &self,
        request: &ExportRequest,
        endpoint: &str,
        path: &Path,
    ) -> Result<RecordFilter, ExportError> {
        let transport = |source| ExportError::Transport {
            endpoint: endpoint.to_string(),
            source,
        };

        let response = self
            .client
            .get(endpoint)
            .bearer_auth(request.token.expose())
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExportError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        let mut file = tokio::fs::File::create(path)
            .await
            .map_err(ExportError::io(path))?;
        let mut filter = RecordFilter::new(request.include_drafts, request.include_assets);
        let mut out = Vec::new();
        let mut body = response.bytes_stream();

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(transport)?;
            filter.push(&chunk, &mut out);
            if !out.is_empty() {
                file.write_all(&out).await.map_err(ExportError::io(path))?;
                out.clear();
            }
        }

        filter.finish(&mut out);
        file.write_all(&out).await.map_err(ExportError::io(path))?;
        file.flush().await.map_err(ExportError::io(path))?;

        Ok(filter)
    }
}

#[async_trait]
impl DatasetExporter for HttpExporter {
    async fn export(
        &self,
        request: &ExportRequest,
        out_dir: &Path,
    ) -> Result<ExportSummary, ExportError> {
        tokio::fs::create_dir_all(out_dir)
            .await
            .map_err(ExportError::io(out_dir))?;

        let endpoint = self.export_url(&request.dataset);
        let documents_path = out_dir.join(DOCUMENTS_FILE);
        tracing::info!(
            dataset = %request.dataset,
            include_drafts = request.include_drafts,
            include_assets = request.include_assets,
            "starting dataset export"
        );

        let filter = self
            .stream_records(request, &endpoint, &documents_path)
            .await?;
        let stats = filter.stats();

        let bytes = tokio::fs::metadata(&documents_path)
            .await
            .map_err(ExportError::io(&documents_path))?
            .len();
        if bytes == 0 {
            return Err(ExportError::EmptyExport {
                dataset: request.dataset.clone(),
                path: documents_path,
            });
        }

        let (assets_dir, assets) = if request.include_assets {
            let dir = out_dir.join(ASSETS_DIR);
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(ExportError::io(&dir))?;

            let jobs: Vec<AssetJob> = filter
                .into_assets()
                .into_iter()
                .map(|asset| AssetJob {
                    url: asset.url(&self.cdn_base_url, &request.project_id, &request.dataset),
                    file_name: asset.file_name(),
                })
                .collect();
            tracing::info!(assets = jobs.len(), "downloading referenced assets");

            let summary = download_all(&self.client, jobs, &dir, request.asset_concurrency).await;
            (Some(dir), summary)
        } else {
            (None, AssetSummary::default())
        };

        if stats.unparsed > 0 {
            tracing::warn!(
                lines = stats.unparsed,
                "export contained lines that are not valid JSON"
            );
        }
        tracing::info!(
            dataset = %request.dataset,
            documents = stats.documents,
            drafts_skipped = stats.drafts_skipped,
            bytes,
            assets_downloaded = assets.downloaded,
            assets_failed = assets.failed,
            "dataset export finished"
        );

        Ok(ExportSummary {
            documents_path,
            assets_dir,
            documents: stats.documents,
            drafts_skipped: stats.drafts_skipped,
            bytes,
            assets,
        })
    }
}
