//! # bunkr-dl
//!
//! Outage-aware download engine for Bunkr albums and files.
//!
//! A job takes one or more album or item URLs, resolves them into direct
//! file links, and downloads the files with a bounded worker pool. Every job
//! owns an append-only event log that can be replayed from any index or
//! followed live, so a front-end can reconnect without losing progress.
//!
//! ## Design
//!
//! - **Outage-aware retries** - edge-host failures are checked against the
//!   status page before deciding to wait, skip or fail
//! - **Crash-safe writes** - bytes land in a `.part` file that is only renamed
//!   once complete, so re-runs skip finished files
//! - **Library-first** - the REST API in [`api`] is an optional thin layer
//!
//! ## Quick Start
//!
//! ```no_run
//! use bunkr_dl::{BunkrDownloader, Config, JobRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let downloader = BunkrDownloader::new(Config::default()).await?;
//!
//!     let job_id = downloader
//!         .submit(JobRequest::new(["https://bunkr.cr/a/abcd1234"]))
//!         .await?;
//!
//!     let mut events = downloader.subscribe(job_id)?;
//!     while let Some(event) = events.recv().await {
//!         println!("#{} {:?}", event.index, event.event);
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// REST API module
pub mod api;
/// Per-job event logs, progress reporting and the session log
pub mod broker;
/// Configuration types
pub mod config;
/// Core downloader implementation (decomposed into focused submodules)
pub mod downloader;
/// Error types
pub mod error;
/// URL classification, album pagination and link decryption
pub mod resolver;
/// Retry logic with exponential backoff and maintenance handling
pub mod retry;
/// Bounded-concurrency item scheduling with a final retry sweep
pub mod scheduler;
/// Subdomain status page lookups
pub mod status;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;
/// Chunked, resumable-safe file writer
pub mod writer;

// Re-export commonly used types
pub use broker::{EventBroker, JobLog, JobSubscription};
pub use config::{Config, MaintenanceStrategy, NetworkOverrides};
pub use downloader::BunkrDownloader;
pub use error::{ApiError, ErrorDetail, Error, ResolutionError, Result, ToHttpStatus};
pub use types::{
    DownloadDescriptor, Event, IndexedEvent, JobId, JobInfo, JobOutcome, JobRequest, JobStatus,
    LogLevel,
};

/// Helper function to run the downloader with graceful signal handling.
///
/// Waits for a termination signal and then calls the downloader's `shutdown()` method,
/// which cancels running jobs and waits for them to settle.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use bunkr_dl::{BunkrDownloader, Config, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let downloader = BunkrDownloader::new(Config::default()).await?;
///
///     let api = tokio::spawn(bunkr_dl::api::start_api_server(
///         std::sync::Arc::new(downloader.clone()),
///         std::sync::Arc::new(downloader.config().clone()),
///     ));
///
///     run_with_shutdown(downloader).await?;
///     api.abort();
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(downloader: BunkrDownloader) -> Result<()> {
    wait_for_signal().await;
    downloader.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
