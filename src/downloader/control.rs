//! Job control: submission, inspection, cancellation and event access.

use crate::broker::JobSubscription;
use crate::error::{Error, Result};
use crate::types::{Event, IndexedEvent, JobId, JobInfo, JobOutcome, JobRequest, JobStatus};
use chrono::Utc;

use super::{BunkrDownloader, JobEntry, PreparedJob};

impl BunkrDownloader {
    /// Submit a job and run it in the background
    ///
    /// Returns as soon as the job is registered; progress is observed
    /// through [`subscribe`](Self::subscribe) or
    /// [`replay_since`](Self::replay_since).
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] when the request has no URLs or an out-of-range
    ///   `max_workers`
    /// - [`Error::ShuttingDown`] once shutdown has started
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use bunkr_dl::*;
    /// # async fn example(downloader: BunkrDownloader) -> Result<()> {
    /// let job_id = downloader
    ///     .submit(JobRequest::new(["https://bunkr.cr/a/abc123"]))
    ///     .await?;
    /// let mut events = downloader.subscribe_since(job_id, 0)?;
    /// while let Some(event) = events.recv().await {
    ///     println!("{:?}", event);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn submit(&self, request: JobRequest) -> Result<JobId> {
        let job = self.prepare(request)?;
        let job_id = job.job_id;

        let downloader = self.clone();
        tokio::spawn(async move {
            downloader.execute(job).await;
        });

        Ok(job_id)
    }

    /// Run a job to completion on the current task
    ///
    /// Headless counterpart of [`submit`](Self::submit); events are still
    /// logged and can be replayed afterwards.
    pub async fn run_job(&self, request: JobRequest) -> Result<(JobId, JobOutcome)> {
        let job = self.prepare(request)?;
        let job_id = job.job_id;
        let outcome = self.execute(job).await;
        Ok((job_id, outcome))
    }

    /// Validate a request, register the job and open its event log
    pub(crate) fn prepare(&self, request: JobRequest) -> Result<PreparedJob> {
        self.ensure_accepting()?;
        self.validate_request(&request)?;

        let job_id = JobId::new();
        let cancel = self.registry.shutdown.child_token();
        let log = self.broker.open(job_id);
        log.publish(Event::status(JobStatus::Pending, None))?;

        self.registry.jobs.write().insert(
            job_id,
            JobEntry {
                info: JobInfo {
                    job_id,
                    status: JobStatus::Pending,
                    created_at: Utc::now(),
                    finished_at: None,
                    urls: request.urls.clone(),
                    error: None,
                    event_count: 0,
                },
                cancel: cancel.clone(),
            },
        );

        tracing::info!(job_id = %job_id, urls = request.urls.len(), "Job submitted");

        Ok(PreparedJob {
            job_id,
            request,
            cancel,
        })
    }

    fn validate_request(&self, request: &JobRequest) -> Result<()> {
        let urls_present = request.urls.iter().any(|url| !url.trim().is_empty());
        if !urls_present {
            return Err(Error::Config {
                message: "at least one URL is required".to_string(),
                key: Some("urls".to_string()),
            });
        }

        if let Some(workers) = request.max_workers {
            let limit = self.config.download.max_workers_limit;
            if workers == 0 || workers > limit {
                return Err(Error::Config {
                    message: format!("max_workers must be between 1 and {}", limit),
                    key: Some("max_workers".to_string()),
                });
            }
        }
        Ok(())
    }

    /// Cancel a running job
    ///
    /// In-flight writes stop at their next chunk boundary and keep their
    /// `.part` files. Cancelling a finished job fails with
    /// [`Error::JobClosed`].
    pub fn cancel(&self, job_id: JobId) -> Result<()> {
        let jobs = self.registry.jobs.read();
        let entry = jobs
            .get(&job_id)
            .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))?;

        if entry.info.status.is_terminal() {
            return Err(Error::JobClosed {
                job_id: job_id.to_string(),
                reason: format!("job already {}", entry.info.status),
            });
        }

        tracing::info!(job_id = %job_id, "Cancelling job");
        entry.cancel.cancel();
        Ok(())
    }

    /// Snapshot of one job
    pub fn get_job(&self, job_id: JobId) -> Result<JobInfo> {
        let mut info = self
            .registry
            .jobs
            .read()
            .get(&job_id)
            .map(|entry| entry.info.clone())
            .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))?;
        info.event_count = self.broker.get(job_id).map(|log| log.len()).unwrap_or(0);
        Ok(info)
    }

    /// Snapshots of every retained job, oldest first
    pub fn list_jobs(&self) -> Vec<JobInfo> {
        let mut jobs: Vec<JobInfo> = self
            .registry
            .jobs
            .read()
            .values()
            .map(|entry| entry.info.clone())
            .collect();
        for info in &mut jobs {
            info.event_count = self
                .broker
                .get(info.job_id)
                .map(|log| log.len())
                .unwrap_or(0);
        }
        jobs.sort_by_key(|info| info.created_at);
        jobs
    }

    /// Live events of a job from now on
    pub fn subscribe(&self, job_id: JobId) -> Result<JobSubscription> {
        self.broker.subscribe(job_id)
    }

    /// Events from index `since` onward, continuing live
    pub fn subscribe_since(&self, job_id: JobId, since: u64) -> Result<JobSubscription> {
        self.broker.subscribe_since(job_id, since)
    }

    /// Logged events with index >= `since`, and the next index to ask for
    pub fn replay_since(&self, job_id: JobId, since: u64) -> Result<(Vec<IndexedEvent>, u64)> {
        self.broker.replay_since(job_id, since)
    }
}
