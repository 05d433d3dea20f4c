//! Core downloader implementation split into focused submodules.
//!
//! The `BunkrDownloader` struct and its methods are organized by domain:
//! - [`control`] - Job submission, inspection, cancellation and event access
//! - [`tasks`] - Per-job pipeline (pre-flight, resolution, scheduling)
//! - [`lifecycle`] - Shutdown coordination
//! - [`services`] - Background services (event log reaper)

mod control;
mod lifecycle;
mod services;
mod tasks;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::broker::{EventBroker, SessionLog};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::status::{HttpStatusSource, StatusCache};
use crate::types::{JobId, JobInfo, JobRequest, JobStatus, SubdomainStatus};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio_util::sync::CancellationToken;

/// Registry entry of one job
pub(crate) struct JobEntry {
    pub(crate) info: JobInfo,
    pub(crate) cancel: CancellationToken,
}

/// Job state shared by the engine and its background tasks
#[derive(Clone)]
pub(crate) struct JobRegistry {
    /// Jobs by id; entries are removed together with their event logs
    pub(crate) jobs: Arc<RwLock<HashMap<JobId, JobEntry>>>,
    /// Set to false during shutdown
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Parent of every job's cancellation token
    pub(crate) shutdown: CancellationToken,
}

/// Main downloader instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct BunkrDownloader {
    /// Configuration shared by every job
    pub(crate) config: Arc<Config>,
    /// HTTP client shared by resolver, status source and writers
    pub(crate) client: reqwest::Client,
    /// Process-wide subdomain status cache
    pub(crate) status_cache: Arc<StatusCache>,
    /// Per-job event logs
    pub(crate) broker: Arc<EventBroker>,
    /// Problematic URL log, when enabled
    pub(crate) session_log: Option<Arc<SessionLog>>,
    /// Job registry and shutdown state
    pub(crate) registry: JobRegistry,
}

/// Job validated and registered, ready to run
pub(crate) struct PreparedJob {
    pub(crate) job_id: JobId,
    pub(crate) request: JobRequest,
    pub(crate) cancel: CancellationToken,
}

impl BunkrDownloader {
    /// Create a new BunkrDownloader instance
    ///
    /// Validates the configuration, builds the shared HTTP client and status
    /// cache, and starts the event log reaper.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .connect_timeout(config.network.download_timeout)
            .build()?;

        let status_source = HttpStatusSource::new(
            client.clone(),
            config.network.status_page.clone(),
            config.network.user_agent.clone(),
            config.network.request_timeout,
        );

        let session_log = config
            .download
            .session_log
            .as_ref()
            .map(|path| Arc::new(SessionLog::new(path.clone())));

        let downloader = Self {
            broker: Arc::new(EventBroker::new(config.broker.live_capacity)),
            status_cache: Arc::new(StatusCache::new(Arc::new(status_source))),
            config: Arc::new(config),
            client,
            session_log,
            registry: JobRegistry {
                jobs: Arc::new(RwLock::new(HashMap::new())),
                accepting_new: Arc::new(AtomicBool::new(true)),
                shutdown: CancellationToken::new(),
            },
        };

        downloader.start_reaper();

        tracing::info!(
            download_dir = %downloader.config.download.download_dir.display(),
            max_workers = downloader.config.download.max_workers,
            status_page = %downloader.config.network.status_page,
            "Downloader initialized"
        );

        Ok(downloader)
    }

    /// Configuration the downloader was created with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Cached subdomain statuses
    pub fn status_snapshot(&self) -> Vec<SubdomainStatus> {
        self.status_cache.snapshot()
    }

    /// Update a job's registry entry
    pub(crate) fn update_job(&self, job_id: JobId, update: impl FnOnce(&mut JobInfo)) {
        if let Some(entry) = self.registry.jobs.write().get_mut(&job_id) {
            update(&mut entry.info);
        }
    }

    /// Record a terminal status in the registry
    pub(crate) fn finish_job(&self, job_id: JobId, status: JobStatus, error: Option<String>) {
        self.update_job(job_id, |info| {
            info.status = status;
            info.finished_at = Some(Utc::now());
            info.error = error;
        });
    }

    /// Whether any registered job has not reached a terminal status
    pub(crate) fn has_active_jobs(&self) -> bool {
        self.registry
            .jobs
            .read()
            .values()
            .any(|entry| !entry.info.status.is_terminal())
    }

    pub(crate) fn ensure_accepting(&self) -> Result<()> {
        if self
            .registry
            .accepting_new
            .load(std::sync::atomic::Ordering::SeqCst)
        {
            Ok(())
        } else {
            Err(Error::ShuttingDown)
        }
    }
}
