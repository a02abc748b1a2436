//! Test configuration builder for creating test setups quickly.

use std::time::Duration;

use crate::config::{Configuration, Secret};
use crate::retry::RetryPolicy;

/// Builder for configurations that pass [`Configuration::validate`] out of
/// the box, with placeholder credentials and a fast retry policy.
#[derive(Debug, Clone)]
pub struct TestConfigBuilder {
    config: Configuration,
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestConfigBuilder {
    /// Defaults:
    /// - source `test-project` / `test-dataset` with token `test-source-token`
    /// - bucket `test-bucket` with placeholder access keys
    /// - retries with 10ms initial delay
    pub fn new() -> Self {
        let mut config = Configuration::default();
        config.source.project_id = "test-project".to_string();
        config.source.dataset = "test-dataset".to_string();
        config.source.token = Secret::new("test-source-token");
        config.storage.account_id = "test-account".to_string();
        config.storage.access_key_id = Secret::new("test-access-key");
        config.storage.secret_access_key = Secret::new("test-secret-key");
        config.storage.bucket = "test-bucket".to_string();
        config.retry = RetryPolicy::new(2, Duration::from_millis(10))
            .with_max_delay(Duration::from_millis(50));
        Self { config }
    }

    pub fn with_source(mut self, project_id: &str, dataset: &str) -> Self {
        self.config.source.project_id = project_id.to_string();
        self.config.source.dataset = dataset.to_string();
        self
    }

    /// Point export and asset downloads at a local test server.
    pub fn with_source_base_url(mut self, base_url: &str) -> Self {
        self.config.source.api_base_url = Some(base_url.to_string());
        self.config.source.cdn_base_url = base_url.to_string();
        self
    }

    pub fn with_storage_prefix(mut self, prefix: &str) -> Self {
        self.config.backup.storage_prefix = prefix.to_string();
        self
    }

    pub fn with_retain_count(mut self, retain_count: usize) -> Self {
        self.config.backup.retain_count = retain_count;
        self
    }

    pub fn with_drafts(mut self, include_drafts: bool) -> Self {
        self.config.backup.include_drafts = include_drafts;
        self
    }

    pub fn with_assets(mut self, include_assets: bool) -> Self {
        self.config.backup.include_assets = include_assets;
        self
    }

    pub fn with_asset_concurrency(mut self, concurrency: usize) -> Self {
        self.config.backup.asset_concurrency = concurrency;
        self
    }

    pub fn with_webhook(mut self, url: &str) -> Self {
        self.config.notify.webhook_url = Some(Secret::new(url));
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    /// Drop the bucket to exercise configuration failures.
    pub fn without_bucket(mut self) -> Self {
        self.config.storage.bucket = String::new();
        self
    }

    pub fn build(self) -> Configuration {
        self.config
    }
}
