//! Per-job pipeline: disk pre-flight, resolution, scheduling and finalization.

use crate::broker::JobReporter;
use crate::resolver::{LinkResolver, ResolvedUrl};
use crate::retry::{MaintenancePolicy, RetryController};
use crate::scheduler::{self, SchedulerContext};
use crate::status::{HttpStatusSource, StatusCache, StatusPolicy};
use crate::types::{FailedItem, JobId, JobOutcome, JobRequest, JobStatus};
use crate::utils::format_directory_name;
use crate::writer::{ChunkedWriter, check_disk_space};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{BunkrDownloader, PreparedJob};

const ORIGIN: &str = "job";

/// Collaborators built for one job from the config and the request overrides
struct JobPipeline {
    resolver: LinkResolver,
    controller: RetryController,
    root: PathBuf,
    max_workers: usize,
}

impl BunkrDownloader {
    /// Run a prepared job and record its terminal status
    pub(crate) async fn execute(&self, job: PreparedJob) -> JobOutcome {
        let PreparedJob {
            job_id,
            request,
            cancel,
        } = job;

        let log = self.broker.open(job_id);
        let reporter = Arc::new(JobReporter::new(
            log.clone(),
            request.log_level,
            self.session_log.clone(),
        ));

        reporter.started();
        reporter.status(JobStatus::Running, None);
        self.update_job(job_id, |info| info.status = JobStatus::Running);
        tracing::info!(job_id = %job_id, "Job started");

        let pipeline = self.build_pipeline(&request, reporter.clone());

        let (outcome, error) = match self.preflight(&request, &pipeline.root, &reporter) {
            Ok(()) => {
                let outcome = self
                    .process_urls(job_id, &request, &pipeline, &reporter, &cancel)
                    .await;
                let error = (!outcome.failed.is_empty() && !outcome.cancelled)
                    .then(|| format!("{} item(s) could not be downloaded", outcome.failed.len()));
                (outcome, error)
            }
            Err(reason) => (
                JobOutcome {
                    failed: vec![FailedItem {
                        url: pipeline.root.display().to_string(),
                        reason: reason.clone(),
                    }],
                    ..Default::default()
                },
                Some(reason),
            ),
        };

        let status = outcome.status();
        reporter.status(status, error.clone());
        self.finish_job(job_id, status, error);
        reporter.ended();
        log.close();

        tracing::info!(
            job_id = %job_id,
            status = %status,
            complete = outcome.complete,
            skipped = outcome.skipped,
            failed = outcome.failed.len(),
            "Job finished"
        );

        outcome
    }

    fn build_pipeline(&self, request: &JobRequest, reporter: Arc<JobReporter>) -> JobPipeline {
        let config = &self.config;
        let network = match &request.network {
            Some(overrides) => config.network.with_overrides(overrides),
            None => config.network.clone(),
        };

        // A different status page gets its own cache
        let status_cache = if network.status_page == config.network.status_page {
            self.status_cache.clone()
        } else {
            Arc::new(StatusCache::new(Arc::new(HttpStatusSource::new(
                self.client.clone(),
                network.status_page.clone(),
                network.user_agent.clone(),
                network.request_timeout,
            ))))
        };

        let status_policy = StatusPolicy {
            enabled: config.status.enabled && !request.disable_status_check,
            ttl: request
                .status_cache_ttl_secs
                .map(Duration::from_secs)
                .unwrap_or(config.status.cache_ttl),
        };

        let maintenance = MaintenancePolicy {
            strategy: request
                .maintenance_strategy
                .unwrap_or(config.maintenance.strategy),
            backoff_delays: config.maintenance.backoff_delays.clone(),
        };

        let writer = Arc::new(ChunkedWriter::new(self.client.clone(), network.clone()));
        let controller = RetryController::new(
            writer,
            status_cache,
            status_policy,
            maintenance,
            config.retry.clone(),
            reporter,
        );

        JobPipeline {
            resolver: LinkResolver::new(self.client.clone(), network, config.retry.clone()),
            controller,
            root: request
                .custom_path
                .clone()
                .unwrap_or_else(|| config.download.download_dir.clone()),
            max_workers: request.max_workers.unwrap_or(config.download.max_workers),
        }
    }

    /// Free-space guard; runs before any network call
    fn preflight(
        &self,
        request: &JobRequest,
        root: &Path,
        reporter: &JobReporter,
    ) -> std::result::Result<(), String> {
        if !self.config.disk_space.enabled || request.disable_disk_check {
            reporter.log(
                "Disk check skipped",
                "Disk space check skipped by configuration.",
                ORIGIN,
            );
            return Ok(());
        }

        match check_disk_space(root, self.config.disk_space.min_free_space) {
            Ok(available) => {
                reporter.debug(
                    "Disk space",
                    format!("{} bytes available under {}.", available, root.display()),
                    ORIGIN,
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(path = %root.display(), error = %e, "Disk pre-flight failed");
                reporter.log("Insufficient disk space", e.to_string(), ORIGIN);
                Err(e.to_string())
            }
        }
    }

    async fn process_urls(
        &self,
        job_id: JobId,
        request: &JobRequest,
        pipeline: &JobPipeline,
        reporter: &JobReporter,
        cancel: &CancellationToken,
    ) -> JobOutcome {
        let mut outcome = JobOutcome::default();

        for url in request.urls.iter().map(|u| u.trim()).filter(|u| !u.is_empty()) {
            if cancel.is_cancelled() {
                outcome.cancelled = true;
                break;
            }

            reporter.log("Processing URL", url, "resolver");

            let resolved = tokio::select! {
                _ = cancel.cancelled() => {
                    outcome.cancelled = true;
                    break;
                }
                resolved = pipeline.resolver.resolve(url) => resolved,
            };

            let resolved = match resolved {
                Ok(resolved) => resolved,
                Err(e) => {
                    tracing::warn!(job_id = %job_id, url, error = %e, "URL could not be resolved");
                    reporter.log("Resolution failed", format!("{}: {}", url, e), "resolver");
                    reporter.session_note(url).await;
                    outcome.failed.push(FailedItem {
                        url: url.to_string(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            self.report_resolution(url, &resolved, reporter).await;
            outcome
                .failed
                .extend(resolved.failed_pages.iter().map(|page| FailedItem {
                    url: page.url.clone(),
                    reason: page.reason.clone(),
                }));

            let destination = match format_directory_name(
                resolved.album_name.as_deref(),
                resolved.album_id.as_deref(),
            ) {
                Some(directory) => pipeline.root.join(directory),
                None => pipeline.root.clone(),
            };

            let description = resolved
                .album_name
                .clone()
                .unwrap_or_else(|| url.to_string());
            reporter.overall(description, resolved.descriptors.len() as u64);

            if resolved.descriptors.is_empty() {
                reporter.log("Nothing to download", format!("No items found at {}.", url), ORIGIN);
                continue;
            }

            let ctx = SchedulerContext {
                max_workers: pipeline.max_workers,
                include: &request.include,
                ignore: &request.ignore,
                reporter,
                cancel,
            };
            outcome.merge(
                scheduler::run(
                    &resolved.descriptors,
                    &destination,
                    &ctx,
                    &pipeline.controller,
                )
                .await,
            );

            if outcome.cancelled {
                break;
            }
        }

        outcome
    }

    async fn report_resolution(&self, url: &str, resolved: &ResolvedUrl, reporter: &JobReporter) {
        if let Some(album_id) = &resolved.album_id {
            reporter.debug(
                "Album pages",
                format!(
                    "{} page(s) fetched for album {}, {} item(s) found.",
                    resolved.pages_fetched,
                    album_id,
                    resolved.descriptors.len() + resolved.unresolved.len()
                ),
                "resolver",
            );
        }

        for page in &resolved.failed_pages {
            reporter.log(
                "Album page failed",
                format!(
                    "{} could not be fetched, the album listing may be incomplete: {}",
                    page.url, page.reason
                ),
                "resolver",
            );
            reporter.session_note(&page.url).await;
        }

        for item in &resolved.unresolved {
            reporter.log(
                "Skipped item",
                format!("{} could not be resolved: {}", item.url, item.reason),
                "resolver",
            );
            reporter.session_note(&item.url).await;
        }

        for descriptor in &resolved.descriptors {
            reporter.debug(
                "Resolved",
                format!("{} -> {}", descriptor.source_url, descriptor.resolved_url),
                "resolver",
            );
        }

        tracing::debug!(
            url,
            descriptors = resolved.descriptors.len(),
            unresolved = resolved.unresolved.len(),
            failed_pages = resolved.failed_pages.len(),
            "URL resolved"
        );
    }
}
