use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::retry::RetryPolicy;

/// Configuration file picked up from the working directory when present.
pub const DEFAULT_CONFIG_FILE: &str = "cms-backup.toml";

/// Prefix for nested overrides, e.g. `CMS_BACKUP__RETRY__MAX_RETRIES=5`.
pub const ENV_PREFIX: &str = "CMS_BACKUP__";

/// Flat variables injected by the CI workflow, mapped onto nested keys.
const ENV_ALIASES: &[(&str, &str)] = &[
    ("SOURCE_TOKEN", "source.token"),
    ("SOURCE_PROJECT_ID", "source.project_id"),
    ("SOURCE_DATASET", "source.dataset"),
    ("STORAGE_ACCOUNT_ID", "storage.account_id"),
    ("STORAGE_ACCESS_KEY_ID", "storage.access_key_id"),
    ("STORAGE_SECRET_ACCESS_KEY", "storage.secret_access_key"),
    ("STORAGE_BUCKET", "storage.bucket"),
    ("STORAGE_ENDPOINT", "storage.endpoint"),
    ("STORAGE_PREFIX", "backup.storage_prefix"),
    ("RETAIN_COUNT", "backup.retain_count"),
    ("RETAIN_MAX_AGE", "backup.retain_max_age"),
    ("INCLUDE_DRAFTS", "backup.include_drafts"),
    ("INCLUDE_ASSETS", "backup.include_assets"),
    ("ASSET_CONCURRENCY", "backup.asset_concurrency"),
    ("NOTIFY_WEBHOOK_URL", "notify.webhook_url"),
    ("LOG_LEVEL", "log_level"),
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration value {name}")]
    Missing { name: &'static str },

    #[error("invalid configuration value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
}

/// A credential value that never shows up in `Debug` output.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret([REDACTED])")
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        string_like(deserializer).map(Secret)
    }
}

/// Environment values such as `12345` are parsed as numbers by figment;
/// identifiers and tokens must stay strings regardless.
fn string_like<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Unsigned(u64),
        Signed(i64),
        Float(f64),
        Bool(bool),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Str(s) => s,
        Raw::Unsigned(n) => n.to_string(),
        Raw::Signed(n) => n.to_string(),
        Raw::Float(n) => n.to_string(),
        Raw::Bool(b) => b.to_string(),
    })
}

/// Remote content source (the headless CMS project).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Env: SOURCE_PROJECT_ID
    #[serde(deserialize_with = "string_like")]
    pub project_id: String,

    /// Env: SOURCE_DATASET
    #[serde(deserialize_with = "string_like")]
    pub dataset: String,

    /// Env: SOURCE_TOKEN
    pub token: Secret,

    /// Export API base. Defaults to `https://{project_id}.api.sanity.io`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base_url: Option<String>,

    /// Base URL of the public asset CDN.
    pub cdn_base_url: String,

    pub api_version: String,

    /// Upper bound for a single export or asset request.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            dataset: String::new(),
            token: Secret::default(),
            api_base_url: None,
            cdn_base_url: "https://cdn.sanity.io".to_string(),
            api_version: "2021-06-07".to_string(),
            request_timeout: Duration::from_secs(600),
        }
    }
}

impl SourceConfig {
    pub fn api_base_url(&self) -> String {
        self.api_base_url
            .clone()
            .unwrap_or_else(|| format!("https://{}.api.sanity.io", self.project_id))
    }
}

/// S3-compatible object storage (Cloudflare R2 by default).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Env: STORAGE_ACCOUNT_ID
    #[serde(deserialize_with = "string_like")]
    pub account_id: String,

    /// Env: STORAGE_ACCESS_KEY_ID
    pub access_key_id: Secret,

    /// Env: STORAGE_SECRET_ACCESS_KEY
    pub secret_access_key: Secret,

    /// Env: STORAGE_BUCKET
    #[serde(deserialize_with = "string_like")]
    pub bucket: String,

    /// Env: STORAGE_ENDPOINT
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    pub region: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            account_id: String::new(),
            access_key_id: Secret::default(),
            secret_access_key: Secret::default(),
            bucket: String::new(),
            endpoint: None,
            region: "auto".to_string(),
        }
    }
}

impl StorageConfig {
    /// First required storage setting that is absent, by variable name.
    pub fn missing_setting(&self) -> Option<&'static str> {
        if self.bucket.trim().is_empty() {
            Some("STORAGE_BUCKET")
        } else if self.account_id.trim().is_empty() && self.endpoint.is_none() {
            Some("STORAGE_ACCOUNT_ID")
        } else if self.access_key_id.is_empty() {
            Some("STORAGE_ACCESS_KEY_ID")
        } else if self.secret_access_key.is_empty() {
            Some("STORAGE_SECRET_ACCESS_KEY")
        } else {
            None
        }
    }

    pub fn endpoint(&self) -> String {
        self.endpoint.clone().unwrap_or_else(|| {
            format!("https://{}.r2.cloudflarestorage.com", self.account_id)
        })
    }
}

/// Business options of a backup run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Leading key segment; an empty prefix puts backups at the bucket root.
    ///
    /// Env: STORAGE_PREFIX
    #[serde(deserialize_with = "string_like")]
    pub storage_prefix: String,

    /// Env: RETAIN_COUNT
    pub retain_count: usize,

    /// Age-based pruning instead of count-based when set.
    ///
    /// Env: RETAIN_MAX_AGE
    #[serde(
        default,
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub retain_max_age: Option<Duration>,

    /// Env: INCLUDE_DRAFTS
    pub include_drafts: bool,

    /// Env: INCLUDE_ASSETS
    pub include_assets: bool,

    /// Env: ASSET_CONCURRENCY
    pub asset_concurrency: usize,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            storage_prefix: "sanity".to_string(),
            retain_count: 7,
            retain_max_age: None,
            include_drafts: true,
            include_assets: true,
            asset_concurrency: 6,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Env: NOTIFY_WEBHOOK_URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<Secret>,

    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    #[serde(alias = "warning")]
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Configuration {
    pub source: SourceConfig,
    pub storage: StorageConfig,
    pub backup: BackupConfig,
    pub notify: NotifyConfig,
    pub retry: RetryPolicy,
    /// Env: LOG_LEVEL
    pub log_level: LogLevel,
}

impl Configuration {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path(Path::new(DEFAULT_CONFIG_FILE))
    }

    /// Defaults, then the TOML file (if it exists), then nested
    /// `CMS_BACKUP__` variables, then the flat workflow variables.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        Ok(Self::figment(path).extract().map_err(Box::new)?)
    }

    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Configuration::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(aliased_env())
    }

    /// Eager check of everything the pipeline needs before its first
    /// network call.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.token.is_empty() {
            return Err(ConfigError::Missing {
                name: "SOURCE_TOKEN",
            });
        }
        if self.source.project_id.trim().is_empty() {
            return Err(ConfigError::Missing {
                name: "SOURCE_PROJECT_ID",
            });
        }
        if self.source.dataset.trim().is_empty() {
            return Err(ConfigError::Missing {
                name: "SOURCE_DATASET",
            });
        }
        if let Some(name) = self.storage.missing_setting() {
            return Err(ConfigError::Missing { name });
        }

        if self.backup.retain_count == 0 {
            return Err(ConfigError::Invalid {
                name: "RETAIN_COUNT",
                reason: "must keep at least one backup".to_string(),
            });
        }
        if self.backup.asset_concurrency == 0 {
            return Err(ConfigError::Invalid {
                name: "ASSET_CONCURRENCY",
                reason: "must be at least 1".to_string(),
            });
        }
        if let Some(max_age) = self.backup.retain_max_age
            && max_age.is_zero()
        {
            return Err(ConfigError::Invalid {
                name: "RETAIN_MAX_AGE",
                reason: "must be a positive duration".to_string(),
            });
        }
        if let Some(webhook) = &self.notify.webhook_url
            && !webhook.is_empty()
        {
            url::Url::parse(webhook.expose()).map_err(|e| ConfigError::Invalid {
                name: "NOTIFY_WEBHOOK_URL",
                reason: e.to_string(),
            })?;
        }

        self.retry.validate().map_err(|reason| ConfigError::Invalid {
            name: "retry",
            reason,
        })
    }

    /// Literal credential values, for the log redactor.
    pub fn secrets(&self) -> Vec<String> {
        let mut secrets = vec![
            self.source.token.clone(),
            self.storage.access_key_id.clone(),
            self.storage.secret_access_key.clone(),
        ];
        secrets.extend(self.notify.webhook_url.clone());

        secrets
            .into_iter()
            .filter(|s| !s.is_empty())
            .map(|s| s.expose().to_string())
            .collect()
    }
}

fn aliased_env() -> Env {
    Env::raw().filter_map(|key| {
        ENV_ALIASES
            .iter()
            .find(|(name, _)| key.as_str().eq_ignore_ascii_case(name))
            .map(|(_, path)| (*path).into())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    fn load() -> Result<Configuration, figment::Error> {
        Configuration::figment(Path::new(DEFAULT_CONFIG_FILE)).extract()
    }

    fn required_env(jail: &mut Jail) {
        jail.set_env("SOURCE_TOKEN", "sk-live-token");
        jail.set_env("SOURCE_PROJECT_ID", "abc123");
        jail.set_env("SOURCE_DATASET", "production");
        jail.set_env("STORAGE_ACCOUNT_ID", "acct");
        jail.set_env("STORAGE_ACCESS_KEY_ID", "AKIAEXAMPLE");
        jail.set_env("STORAGE_SECRET_ACCESS_KEY", "very-secret");
        jail.set_env("STORAGE_BUCKET", "backups");
    }

    #[test]
    fn test_defaults() {
        let config = Configuration::default();

        assert_eq!(config.backup.storage_prefix, "sanity");
        assert_eq!(config.backup.retain_count, 7);
        assert!(config.backup.include_drafts);
        assert!(config.backup.include_assets);
        assert_eq!(config.backup.asset_concurrency, 6);
        assert_eq!(config.log_level, LogLevel::Info);
        assert!(config.notify.webhook_url.is_none());
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn test_flat_workflow_variables() {
        Jail::expect_with(|jail| {
            required_env(jail);
            jail.set_env("RETAIN_COUNT", "14");
            jail.set_env("INCLUDE_DRAFTS", "false");
            jail.set_env("ASSET_CONCURRENCY", "2");
            jail.set_env("STORAGE_PREFIX", "cms");
            jail.set_env("LOG_LEVEL", "debug");

            let config = load()?;
            assert_eq!(config.source.project_id, "abc123");
            assert_eq!(config.source.token.expose(), "sk-live-token");
            assert_eq!(config.storage.bucket, "backups");
            assert_eq!(config.backup.retain_count, 14);
            assert!(!config.backup.include_drafts);
            assert!(config.backup.include_assets);
            assert_eq!(config.backup.asset_concurrency, 2);
            assert_eq!(config.backup.storage_prefix, "cms");
            assert_eq!(config.log_level, LogLevel::Debug);
            assert!(config.validate().is_ok());
            Ok(())
        });
    }

    #[test]
    fn test_numeric_identifiers_stay_strings() {
        Jail::expect_with(|jail| {
            required_env(jail);
            jail.set_env("SOURCE_PROJECT_ID", "12345");

            let config = load()?;
            assert_eq!(config.source.project_id, "12345");
            Ok(())
        });
    }

    #[test]
    fn test_nested_prefixed_overrides() {
        Jail::expect_with(|jail| {
            required_env(jail);
            jail.set_env("CMS_BACKUP__RETRY__MAX_RETRIES", "5");
            jail.set_env("CMS_BACKUP__RETRY__INITIAL_DELAY", "250ms");
            jail.set_env("CMS_BACKUP__BACKUP__RETAIN_MAX_AGE", "30days");

            let config = load()?;
            assert_eq!(config.retry.max_retries, 5);
            assert_eq!(config.retry.initial_delay, Duration::from_millis(250));
            assert_eq!(
                config.backup.retain_max_age,
                Some(Duration::from_secs(30 * 24 * 3600))
            );
            Ok(())
        });
    }

    #[test]
    fn test_toml_file_is_layered_under_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                DEFAULT_CONFIG_FILE,
                r#"
                [backup]
                retain_count = 3
                storage_prefix = "from-file"
                "#,
            )?;
            required_env(jail);
            jail.set_env("STORAGE_PREFIX", "from-env");

            let config = load()?;
            assert_eq!(config.backup.retain_count, 3);
            assert_eq!(config.backup.storage_prefix, "from-env");
            Ok(())
        });
    }

    #[test]
    fn test_validate_reports_first_missing_variable() {
        let config = Configuration::default();
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Missing {
                name: "SOURCE_TOKEN"
            }
        ));

        Jail::expect_with(|jail| {
            jail.set_env("SOURCE_TOKEN", "sk-live-token");
            jail.set_env("SOURCE_PROJECT_ID", "abc123");
            jail.set_env("SOURCE_DATASET", "production");
            jail.set_env("STORAGE_ACCOUNT_ID", "acct");

            let config = load()?;
            let err = config.validate().unwrap_err();
            assert!(matches!(
                err,
                ConfigError::Missing {
                    name: "STORAGE_BUCKET"
                }
            ));
            Ok(())
        });
    }

    #[test]
    fn test_validate_rejects_zero_retain_count() {
        Jail::expect_with(|jail| {
            required_env(jail);
            jail.set_env("RETAIN_COUNT", "0");

            let config = load()?;
            assert!(matches!(
                config.validate(),
                Err(ConfigError::Invalid {
                    name: "RETAIN_COUNT",
                    ..
                })
            ));
            Ok(())
        });
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = Secret::new("hunter2");
        assert_eq!(format!("{secret:?}"), "Secret([REDACTED])");

        let mut config = Configuration::default();
        config.source.token = Secret::new("hunter2");
        assert!(!format!("{config:?}").contains("hunter2"));
        assert_eq!(config.secrets(), vec!["hunter2".to_string()]);
    }
}
