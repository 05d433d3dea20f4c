//! Retry logic with exponential backoff and outage awareness
//!
//! Two layers live here:
//!
//! - [`download_with_retry`]: a generic exponential-backoff loop for any
//!   operation whose error implements [`IsRetryable`] (used for page fetches).
//! - [`RetryController`]: the per-file attempt wrapper. It classifies each
//!   writer failure, consults the [`StatusCache`] when the edge host looks
//!   down, and turns the result into an [`AttemptOutcome`] for the scheduler.
//!
//! # Example
//!
//! ```no_run
//! use bunkr_dl::retry::{IsRetryable, download_with_retry};
//! use bunkr_dl::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{:?}", self)
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let config = RetryConfig::default();
//! let result = download_with_retry(&config, || async {
//!     Ok::<_, MyError>(())
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::broker::JobReporter;
use crate::config::{MaintenanceStrategy, RetryConfig};
use crate::error::{Error, FailureClass};
use crate::scheduler::Attempter;
use crate::status::{StatusCache, StatusPolicy};
use crate::types::{AttemptOutcome, DownloadDescriptor, ServerStatus, WriteOutcome};
use crate::writer::{ChunkedWriter, ProgressFn};
use async_trait::async_trait;
use rand::Rng;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const ORIGIN: &str = "retry";

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, resets, server busy) should return `true`.
/// Permanent failures (not found, filesystem errors) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        self.failure_class() == FailureClass::Transient
    }
}

/// Execute an async operation with exponential backoff retry logic
///
/// # Arguments
///
/// * `config` - Retry configuration (max attempts, delays, backoff multiplier, jitter)
/// * `operation` - Async closure that returns Result<T, E> where E implements IsRetryable
///
/// # Returns
///
/// Returns the successful result or the last error after all retry attempts are exhausted.
pub async fn download_with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                attempt += 1;

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(backoff_delay(config, delay)).await;
                delay = next_delay(config, delay);
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt + 1,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::debug!(error = %e, "Operation failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}

fn backoff_delay(config: &RetryConfig, delay: Duration) -> Duration {
    if config.jitter {
        add_jitter(delay)
    } else {
        delay
    }
}

fn next_delay(config: &RetryConfig, delay: Duration) -> Duration {
    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier).min(config.max_delay)
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay.
/// This means the actual delay will be between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}

/// Sleep for `delay` unless `cancel` fires first; returns false when cancelled
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// How the controller reacts to subdomain maintenance
#[derive(Clone, Debug)]
pub struct MaintenancePolicy {
    /// Back off or skip
    pub strategy: MaintenanceStrategy,
    /// Waits between maintenance retries; exhausting them fails the file
    pub backoff_delays: Vec<Duration>,
}

/// Wraps writer invocations with failure classification and retries
pub struct RetryController {
    writer: Arc<ChunkedWriter>,
    status: Arc<StatusCache>,
    status_policy: StatusPolicy,
    maintenance: MaintenancePolicy,
    retry: RetryConfig,
    reporter: Arc<JobReporter>,
}

/// What the controller decided after one failed writer call
enum Next {
    RetryAfter(Duration),
    Finish(AttemptOutcome),
}

impl RetryController {
    /// Create a controller for one job
    pub fn new(
        writer: Arc<ChunkedWriter>,
        status: Arc<StatusCache>,
        status_policy: StatusPolicy,
        maintenance: MaintenancePolicy,
        retry: RetryConfig,
        reporter: Arc<JobReporter>,
    ) -> Self {
        Self {
            writer,
            status,
            status_policy,
            maintenance,
            retry,
            reporter,
        }
    }

    async fn on_outage(
        &self,
        descriptor: &DownloadDescriptor,
        error: &Error,
        maintenance_round: &mut usize,
    ) -> Option<Next> {
        let status = self
            .status
            .get_status(&descriptor.subdomain, &self.status_policy)
            .await;

        tracing::debug!(
            subdomain = %descriptor.subdomain,
            status = ?status.status,
            error = %error,
            "Outage suspected, consulted status page"
        );

        match status.status {
            ServerStatus::Maintenance => {
                let raw = status
                    .raw_status
                    .clone()
                    .unwrap_or_else(|| "Maintenance".to_string());
                self.reporter
                    .maintenance_detected(&descriptor.subdomain, &raw, &descriptor.resolved_url)
                    .await;

                match self.maintenance.strategy {
                    MaintenanceStrategy::Skip => {
                        self.reporter.log(
                            "Maintenance skip",
                            format!(
                                "Skipping {} due to maintenance (strategy: skip).",
                                descriptor.filename
                            ),
                            ORIGIN,
                        );
                        Some(Next::Finish(AttemptOutcome::Skipped(format!(
                            "{} is under maintenance",
                            descriptor.subdomain
                        ))))
                    }
                    MaintenanceStrategy::Backoff => {
                        match self.maintenance.backoff_delays.get(*maintenance_round) {
                            Some(delay) => {
                                *maintenance_round += 1;
                                self.reporter.log(
                                    "Waiting for maintenance",
                                    format!(
                                        "{} is under maintenance, retrying {} in {}s ({}/{}).",
                                        descriptor.subdomain,
                                        descriptor.filename,
                                        delay.as_secs(),
                                        maintenance_round,
                                        self.maintenance.backoff_delays.len()
                                    ),
                                    ORIGIN,
                                );
                                Some(Next::RetryAfter(*delay))
                            }
                            None => Some(Next::Finish(AttemptOutcome::Failed {
                                reason: format!(
                                    "{} stayed in maintenance after {} retries",
                                    descriptor.subdomain,
                                    self.maintenance.backoff_delays.len()
                                ),
                                retryable: false,
                            })),
                        }
                    }
                }
            }
            ServerStatus::Offline => {
                self.reporter.log(
                    "Non-operational subdomain",
                    format!(
                        "The subdomain {} for {} is offline ({}). Check the log file.",
                        descriptor.subdomain,
                        descriptor.filename,
                        status.raw_status.as_deref().unwrap_or("offline")
                    ),
                    ORIGIN,
                );
                self.reporter.session_note(&descriptor.resolved_url).await;
                Some(Next::Finish(AttemptOutcome::Failed {
                    reason: format!("{} is offline", descriptor.subdomain),
                    retryable: true,
                }))
            }
            // Up (or unknown) but not answering: treat like any transient failure
            ServerStatus::Operational | ServerStatus::Unknown => None,
        }
    }
}

#[async_trait]
impl Attempter for RetryController {
    async fn attempt(
        &self,
        descriptor: &DownloadDescriptor,
        destination: &Path,
        on_progress: ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> AttemptOutcome {
        let mut transient_retries = 0;
        let mut delay = self.retry.initial_delay;
        let mut maintenance_round = 0;

        loop {
            if cancel.is_cancelled() {
                return AttemptOutcome::Cancelled;
            }

            let error = match self
                .writer
                .write(descriptor, destination, on_progress, cancel)
                .await
            {
                Ok(WriteOutcome::Complete { bytes }) => {
                    tracing::debug!(file = %descriptor.filename, bytes, "Download complete");
                    return AttemptOutcome::Complete;
                }
                Ok(WriteOutcome::Skipped) => {
                    return AttemptOutcome::Skipped(format!(
                        "{} has already been downloaded.",
                        descriptor.filename
                    ));
                }
                Ok(WriteOutcome::Partial { .. }) if cancel.is_cancelled() => {
                    return AttemptOutcome::Cancelled;
                }
                Ok(WriteOutcome::Partial { bytes }) => Error::WriteInterrupted {
                    path: destination.join(format!("{}.part", descriptor.filename)),
                    bytes_written: bytes,
                },
                Err(e) => e,
            };

            let mut class = error.failure_class();
            if class == FailureClass::OutageSuspected {
                match self
                    .on_outage(descriptor, &error, &mut maintenance_round)
                    .await
                {
                    Some(Next::Finish(outcome)) => return outcome,
                    Some(Next::RetryAfter(wait)) => {
                        if !sleep_or_cancel(wait, cancel).await {
                            return AttemptOutcome::Cancelled;
                        }
                        continue;
                    }
                    None => class = FailureClass::Transient,
                }
            }

            match class {
                FailureClass::Permanent => {
                    tracing::warn!(
                        url = %descriptor.resolved_url,
                        error = %error,
                        "Download failed permanently"
                    );
                    return AttemptOutcome::Failed {
                        reason: error.to_string(),
                        retryable: false,
                    };
                }
                _ if transient_retries < self.retry.max_attempts => {
                    transient_retries += 1;
                    self.reporter.log(
                        "Retrying download",
                        format!(
                            "{} for {} ({}/{})...",
                            error, descriptor.filename, transient_retries, self.retry.max_attempts
                        ),
                        ORIGIN,
                    );
                    if !sleep_or_cancel(backoff_delay(&self.retry, delay), cancel).await {
                        return AttemptOutcome::Cancelled;
                    }
                    delay = next_delay(&self.retry, delay);
                }
                _ => {
                    tracing::warn!(
                        url = %descriptor.resolved_url,
                        error = %error,
                        attempts = transient_retries + 1,
                        "Download failed after retries"
                    );
                    return AttemptOutcome::Failed {
                        reason: error.to_string(),
                        retryable: true,
                    };
                }
            }
        }
    }
}
