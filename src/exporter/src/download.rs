//! Bounded-concurrency asset downloads.
//!
//! A failed asset is recorded in the summary and logged; it never fails the
//! export as a whole.

use std::path::Path;

use futures::StreamExt;
use futures::future::join_all;
use tokio::io::AsyncWriteExt;

/// One asset to fetch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssetJob {
    pub url: String,
    pub file_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AssetOutcome {
    Downloaded { url: String, bytes: u64 },
    Failed { url: String, reason: String },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AssetSummary {
    pub total: usize,
    pub downloaded: usize,
    pub failed: usize,
    pub bytes: u64,
    /// URLs of assets that could not be fetched.
    pub failed_urls: Vec<String>,
}

impl AssetSummary {
    pub fn record(&mut self, outcome: AssetOutcome) {
        self.total += 1;
        match outcome {
            AssetOutcome::Downloaded { bytes, .. } => {
                self.downloaded += 1;
                self.bytes += bytes;
            }
            AssetOutcome::Failed { url, .. } => {
                self.failed += 1;
                self.failed_urls.push(url);
            }
        }
    }
}

/// Downloads `jobs` into `dir`, at most `concurrency` at a time.
pub async fn download_all(
    client: &reqwest::Client,
    jobs: Vec<AssetJob>,
    dir: &Path,
    concurrency: usize,
) -> AssetSummary {
    let mut summary = AssetSummary::default();
    let batch_size = concurrency.max(1);
    let total = jobs.len();

    for (index, batch) in jobs.chunks(batch_size).enumerate() {
        let outcomes = join_all(batch.iter().map(|job| download_one(client, job, dir))).await;
        for outcome in outcomes {
            if let AssetOutcome::Failed { url, reason } = &outcome {
                tracing::warn!(%url, %reason, "asset download failed");
            }
            summary.record(outcome);
        }

        tracing::debug!(
            completed = ((index + 1) * batch_size).min(total),
            total,
            "asset batch finished"
        );
    }

    summary
}

async fn download_one(client: &reqwest::Client, job: &AssetJob, dir: &Path) -> AssetOutcome {
    let path = dir.join(&job.file_name);
    match fetch(client, &job.url, &path).await {
        Ok(bytes) => AssetOutcome::Downloaded {
            url: job.url.clone(),
            bytes,
        },
        Err(reason) => {
            // A partial file would end up in the archive.
            let _ = tokio::fs::remove_file(&path).await;
            AssetOutcome::Failed {
                url: job.url.clone(),
                reason,
            }
        }
    }
}

async fn fetch(client: &reqwest::Client, url: &str, path: &Path) -> Result<u64, String> {
    let response = client.get(url).send().await.map_err(|e| e.to_string())?;
    let status = response.status();
    if !status.is_success() {
        return Err(format!("status {status}"));
    }

    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| format!("create {}: {e}", path.display()))?;
    let mut body = response.bytes_stream();
    let mut written = 0u64;

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| e.to_string())?;
        file.write_all(&chunk)
            .await
            .map_err(|e| format!("write {}: {e}", path.display()))?;
        written += chunk.len() as u64;
    }

    file.flush()
        .await
        .map_err(|e| format!("flush {}: {e}", path.display()))?;
    Ok(written)
}
