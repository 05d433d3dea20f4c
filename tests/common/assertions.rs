//! Event collection helpers

use bunkr_dl::{BunkrDownloader, Event, IndexedEvent, JobId, JobStatus};
use std::time::Duration;

/// Collect a job's events from `since` until its log is closed
pub async fn collect_until_closed(
    downloader: &BunkrDownloader,
    job_id: JobId,
    since: u64,
    timeout: Duration,
) -> Vec<IndexedEvent> {
    let mut subscription = downloader.subscribe_since(job_id, since).unwrap();
    let mut collected = Vec::new();
    tokio::time::timeout(timeout, async {
        while let Some(event) = subscription.recv().await {
            collected.push(event);
        }
    })
    .await
    .expect("job log was not closed in time");
    collected
}

/// Statuses in log order
pub fn statuses(events: &[IndexedEvent]) -> Vec<JobStatus> {
    events
        .iter()
        .filter_map(|e| match &e.event {
            Event::Status { status, .. } => Some(*status),
            _ => None,
        })
        .collect()
}

/// Titles of `log` events in log order
pub fn log_titles(events: &[IndexedEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match &e.event {
            Event::Log { event, .. } => Some(event.clone()),
            _ => None,
        })
        .collect()
}

/// Count `log` events with the given title
pub fn count_logs(events: &[IndexedEvent], title: &str) -> usize {
    log_titles(events).iter().filter(|t| *t == title).count()
}
