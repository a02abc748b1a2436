//! Best-effort status messages to a chat webhook.
//!
//! Delivery failures are logged and swallowed: a broken notification
//! channel never fails or masks the outcome of a backup.

use std::time::Duration;

use common::Redactor;
use common::config::NotifyConfig;
use common::format::{human_bytes, human_duration};
use serde::Serialize;
use thiserror::Error;

/// Longest error text included in a failure message.
pub const MAX_ERROR_CHARS: usize = 500;
pub const TRUNCATION_MARKER: &str = "… (truncated)";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to build webhook client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("webhook request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("webhook returned status {status}")]
    Status { status: u16 },
}

/// Terminal outcome of one run, as reported to the channel.
#[derive(Clone, Debug, PartialEq)]
pub enum Notification {
    Success {
        project_id: String,
        dataset: String,
        object_key: String,
        size: u64,
        duration: Duration,
    },
    Failure {
        project_id: String,
        dataset: String,
        stage: String,
        error: String,
        duration: Duration,
    },
}

impl Notification {
    /// Message text. Error detail is redacted, then capped at
    /// [`MAX_ERROR_CHARS`].
    pub fn render(&self, redactor: &Redactor) -> String {
        match self {
            Notification::Success {
                project_id,
                dataset,
                object_key,
                size,
                duration,
            } => format!(
                "✅ Backup succeeded for {project_id}/{dataset}\n\
                 Size: {}\n\
                 Key: {object_key}\n\
                 Duration: {}",
                human_bytes(*size),
                human_duration(*duration)
            ),
            Notification::Failure {
                project_id,
                dataset,
                stage,
                error,
                duration,
            } => format!(
                "❌ Backup failed for {project_id}/{dataset} during {stage}\n\
                 Error: {}\n\
                 Duration: {}",
                truncate(&redactor.redact(error)),
                human_duration(*duration)
            ),
        }
    }
}

pub fn truncate(text: &str) -> String {
    match text.char_indices().nth(MAX_ERROR_CHARS) {
        Some((idx, _)) => format!("{}{TRUNCATION_MARKER}", &text[..idx]),
        None => text.to_string(),
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    text: &'a str,
}

#[derive(Clone, Debug)]
pub struct Notifier {
    client: reqwest::Client,
    webhook_url: Option<String>,
    redactor: Redactor,
}

impl Notifier {
    /// Without a webhook URL every notification is a silent no-op.
    pub fn new(config: &NotifyConfig, redactor: Redactor) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(NotifyError::Client)?;
        let webhook_url = config
            .webhook_url
            .as_ref()
            .filter(|url| !url.is_empty())
            .map(|url| url.expose().to_string());

        Ok(Self {
            client,
            webhook_url,
            redactor,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.webhook_url.is_some()
    }

    /// Sends `notification`; never fails.
    pub async fn notify(&self, notification: &Notification) {
        let Some(url) = &self.webhook_url else {
            tracing::debug!("no webhook configured; skipping notification");
            return;
        };

        let text = notification.render(&self.redactor);
        match self.deliver(url, &text).await {
            Ok(()) => tracing::info!("notification delivered"),
            Err(error) => {
                let message = error.to_string();
                tracing::warn!(error = %self.redactor.redact(&message), "notification failed");
            }
        }
    }

    async fn deliver(&self, url: &str, text: &str) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(url)
            .json(&WebhookPayload { text })
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.without_url()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}
