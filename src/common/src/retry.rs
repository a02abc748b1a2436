//! Retry-with-backoff shared by every network-facing pipeline stage.
//!
//! Delays grow geometrically from `initial_delay` by `multiplier` and are
//! clamped to `max_delay`. The jitter variant stretches each delay by up
//! to 30% so parallel callers do not retry in lockstep.

use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest random extension applied to a delay by [`retry_with_jitter`].
pub const JITTER_FACTOR: f64 = 0.3;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt; `3` means at most four attempts.
    pub max_retries: u32,

    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,

    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    pub multiplier: f64,

    /// Whether stages should use [`retry_with_jitter`].
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            multiplier: 2.0,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            ..Default::default()
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(format!(
                "multiplier must be a finite value >= 1.0, got {}",
                self.multiplier
            ));
        }
        if self.max_delay < self.initial_delay {
            return Err(format!(
                "max_delay ({:?}) is shorter than initial_delay ({:?})",
                self.max_delay, self.initial_delay
            ));
        }
        Ok(())
    }

    /// Delay before retry number `retry` (1-based), without jitter.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.multiplier.powi(retry.saturating_sub(1) as i32);
        let nanos = (self.initial_delay.as_nanos() as f64 * factor).round();
        if !nanos.is_finite() || nanos >= self.max_delay.as_nanos() as f64 {
            self.max_delay
        } else {
            Duration::from_nanos(nanos as u64)
        }
    }
}

/// Optional hooks steering a retry loop.
pub struct RetryHooks<'a, E> {
    /// Classifies an error as retryable. Without it every error is.
    pub should_retry: Option<&'a (dyn Fn(&E) -> bool + Sync)>,

    /// Invoked with (retry number, error, upcoming delay) before each sleep.
    pub on_retry: Option<&'a (dyn Fn(u32, &E, Duration) + Sync)>,
}

impl<E> Default for RetryHooks<'_, E> {
    fn default() -> Self {
        Self {
            should_retry: None,
            on_retry: None,
        }
    }
}

impl<'a, E> RetryHooks<'a, E> {
    pub fn should_retry(mut self, predicate: &'a (dyn Fn(&E) -> bool + Sync)) -> Self {
        self.should_retry = Some(predicate);
        self
    }

    pub fn on_retry(mut self, callback: &'a (dyn Fn(u32, &E, Duration) + Sync)) -> Self {
        self.on_retry = Some(callback);
        self
    }

    fn is_retryable(&self, error: &E) -> bool {
        self.should_retry.is_none_or(|predicate| predicate(error))
    }

    fn notify(&self, retry: u32, error: &E, delay: Duration) {
        if let Some(callback) = self.on_retry
            && catch_unwind(AssertUnwindSafe(|| callback(retry, error, delay))).is_err()
        {
            tracing::warn!(retry, "retry callback panicked; continuing");
        }
    }
}

/// Failure of [`retry_with_jitter`].
#[derive(Debug, Error)]
pub enum RetryError<E: std::error::Error + 'static> {
    #[error("operation failed after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: E,
    },

    /// The classifier refused to retry; the first error is returned as-is.
    #[error(transparent)]
    Rejected(E),
}

impl<E: std::error::Error + 'static> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { source, .. } => source,
            RetryError::Rejected(source) => source,
        }
    }
}

/// Runs `operation` until it succeeds, retries run out, or the classifier
/// rejects an error. The last error is returned unchanged.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    hooks: RetryHooks<'_, E>,
    operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    run(policy, &hooks, operation, |delay| delay)
        .await
        .map_err(|(_, error)| error)
}

/// Like [`retry`] but stretches each delay by up to [`JITTER_FACTOR`] and
/// reports exhaustion with the attempt count.
pub async fn retry_with_jitter<T, E, F, Fut>(
    policy: &RetryPolicy,
    hooks: RetryHooks<'_, E>,
    operation: F,
) -> Result<T, RetryError<E>>
where
    E: std::error::Error + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let outcome = run(policy, &hooks, operation, |delay| {
        let extension = rand::thread_rng().gen_range(0.0..=JITTER_FACTOR);
        delay.mul_f64(1.0 + extension)
    })
    .await;

    outcome.map_err(|(attempts, error)| {
        if hooks.is_retryable(&error) {
            RetryError::Exhausted {
                attempts,
                source: error,
            }
        } else {
            RetryError::Rejected(error)
        }
    })
}

async fn run<T, E, F, Fut>(
    policy: &RetryPolicy,
    hooks: &RetryHooks<'_, E>,
    mut operation: F,
    adjust: impl Fn(Duration) -> Duration,
) -> Result<T, (u32, E)>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        let retry = attempt;
        if retry > policy.max_retries || !hooks.is_retryable(&error) {
            return Err((attempt, error));
        }

        let delay = adjust(policy.delay_for(retry));
        hooks.notify(retry, &error, delay);
        tokio::time::sleep(delay).await;
    }
}
