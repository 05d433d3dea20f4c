//! Bounded-concurrency fan-out over a job's descriptors
//!
//! A run filters the descriptors, dispatches the eligible ones to at most
//! `max_workers` concurrent attempts, and then sweeps once over the
//! attempts that failed with a retryable reason. Cancellation stops new
//! dispatches; attempts already in flight are awaited before returning.
//!
//! ```text
//! descriptors ─► filter ─► pass one ─► sweep (retryable failures) ─► JobOutcome
//!                  │           │              │
//!                  └─ hidden   └──────────────┴─► Attempter (retry + writer)
//! ```

use crate::broker::JobReporter;
use crate::types::{AttemptOutcome, DownloadDescriptor, FailedItem, JobOutcome};
use crate::writer::ProgressFn;
use async_trait::async_trait;
use futures::StreamExt;
use std::path::Path;
use tokio_util::sync::CancellationToken;

const ORIGIN: &str = "scheduler";

/// One download attempt at a descriptor, including any inline retries
#[async_trait]
pub trait Attempter: Send + Sync {
    /// Download `descriptor` into `destination`
    async fn attempt(
        &self,
        descriptor: &DownloadDescriptor,
        destination: &Path,
        on_progress: ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> AttemptOutcome;
}

/// Per-run settings borrowed from the job
pub struct SchedulerContext<'a> {
    /// Concurrent attempts
    pub max_workers: usize,
    /// Substrings a filename must contain one of (empty = everything)
    pub include: &'a [String],
    /// Substrings that exclude a filename; checked before `include`
    pub ignore: &'a [String],
    /// Event sink of the job
    pub reporter: &'a JobReporter,
    /// Job cancellation
    pub cancel: &'a CancellationToken,
}

/// Why a descriptor is not dispatched, if it is filtered out
///
/// Ignore patterns win over include patterns.
pub fn filter_reason(filename: &str, include: &[String], ignore: &[String]) -> Option<String> {
    if ignore.iter().any(|word| filename.contains(word.as_str())) {
        return Some(format!("{} matches the ignore list.", filename));
    }
    if !include.is_empty() && !include.iter().any(|word| filename.contains(word.as_str())) {
        return Some(format!("No included words found for {}.", filename));
    }
    None
}

struct Slot<'d> {
    task_id: u64,
    descriptor: &'d DownloadDescriptor,
}

/// Run every descriptor through `attempter`
pub async fn run(
    descriptors: &[DownloadDescriptor],
    destination: &Path,
    ctx: &SchedulerContext<'_>,
    attempter: &dyn Attempter,
) -> JobOutcome {
    let mut outcome = JobOutcome::default();
    let mut eligible = Vec::with_capacity(descriptors.len());

    for (position, descriptor) in descriptors.iter().enumerate() {
        let task_id = ctx.reporter.add_task(position);
        match filter_reason(&descriptor.filename, ctx.include, ctx.ignore) {
            Some(reason) => {
                ctx.reporter.log("Skipped download", reason, ORIGIN);
                ctx.reporter.finish_task(task_id, false);
                outcome.skipped += 1;
            }
            None => eligible.push(Slot {
                task_id,
                descriptor,
            }),
        }
    }

    let workers = ctx.max_workers.max(1);
    tracing::debug!(
        eligible = eligible.len(),
        filtered = outcome.skipped,
        workers,
        "Dispatching downloads"
    );

    let first_pass = dispatch(eligible, destination, ctx, attempter, workers).await;

    let mut sweep = Vec::new();
    for (slot, result) in first_pass {
        match result {
            AttemptOutcome::Failed {
                reason,
                retryable: true,
            } if !ctx.cancel.is_cancelled() => {
                ctx.reporter.log(
                    "Exceeded retry attempts",
                    format!(
                        "Max retries reached for {}. It will be retried one more time after all other tasks.",
                        slot.descriptor.filename
                    ),
                    ORIGIN,
                );
                tracing::debug!(url = %slot.descriptor.source_url, reason = %reason, "Queued for retry sweep");
                sweep.push(slot);
            }
            other => settle(&slot, other, ctx, &mut outcome),
        }
    }

    if !sweep.is_empty() {
        tracing::info!(count = sweep.len(), "Retrying failed downloads");
        for (slot, result) in dispatch(sweep, destination, ctx, attempter, workers).await {
            settle(&slot, result, ctx, &mut outcome);
        }
    }

    outcome.cancelled |= ctx.cancel.is_cancelled();
    outcome
}

async fn dispatch<'d>(
    slots: Vec<Slot<'d>>,
    destination: &Path,
    ctx: &SchedulerContext<'_>,
    attempter: &dyn Attempter,
    workers: usize,
) -> Vec<(Slot<'d>, AttemptOutcome)> {
    let attempts: Vec<_> = slots
        .into_iter()
        .map(|slot| async move {
            if ctx.cancel.is_cancelled() {
                return (slot, AttemptOutcome::Cancelled);
            }
            let reporter = ctx.reporter;
            let task_id = slot.task_id;
            let on_progress =
                move |bytes: u64, total: Option<u64>| reporter.task_progress(task_id, bytes, total);
            let result = attempter
                .attempt(slot.descriptor, destination, &on_progress, ctx.cancel)
                .await;
            (slot, result)
        })
        .collect();
    futures::stream::iter(attempts)
        .buffer_unordered(workers)
        .collect()
        .await
}

fn settle(
    slot: &Slot<'_>,
    result: AttemptOutcome,
    ctx: &SchedulerContext<'_>,
    outcome: &mut JobOutcome,
) {
    match result {
        AttemptOutcome::Complete => {
            ctx.reporter.finish_task(slot.task_id, true);
            outcome.complete += 1;
        }
        AttemptOutcome::Skipped(reason) => {
            ctx.reporter.log("Skipped download", reason, ORIGIN);
            ctx.reporter.finish_task(slot.task_id, false);
            outcome.skipped += 1;
        }
        AttemptOutcome::Failed { reason, .. } => {
            ctx.reporter.log(
                "Download failed",
                format!(
                    "Failed to download {}: {}.",
                    slot.descriptor.filename, reason
                ),
                ORIGIN,
            );
            ctx.reporter.hide_task(slot.task_id);
            outcome.failed.push(FailedItem {
                url: slot.descriptor.source_url.clone(),
                reason,
            });
        }
        AttemptOutcome::Cancelled => {
            ctx.reporter.hide_task(slot.task_id);
            outcome.cancelled = true;
        }
    }
}
