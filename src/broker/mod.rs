//! Per-job event logs with live subscription and indexed replay
//!
//! Every job owns one append-only log. Publishing takes the log's lock, so
//! indices are assigned in order without gaps, and the event is handed to
//! live subscribers over a broadcast channel under the same lock. Pull
//! consumers read the log directly with [`EventBroker::replay_since`]; push
//! consumers get a [`JobSubscription`], which falls back to the log whenever
//! the broadcast buffer overflows, so both views always agree.

mod reporter;
mod session_log;

pub use reporter::JobReporter;
pub use session_log::SessionLog;

use crate::error::{Error, Result};
use crate::types::{Event, IndexedEvent, JobId, JobStatus};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

struct LogState {
    events: Vec<IndexedEvent>,
    live: Option<broadcast::Sender<IndexedEvent>>,
    terminal: Option<JobStatus>,
    finished_at: Option<Instant>,
}

/// Ordered event log of one job
pub struct JobLog {
    job_id: JobId,
    state: Mutex<LogState>,
}

impl JobLog {
    fn new(job_id: JobId, live_capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(live_capacity.max(1));
        Self {
            job_id,
            state: Mutex::new(LogState {
                events: Vec::new(),
                live: Some(tx),
                terminal: None,
                finished_at: None,
            }),
        }
    }

    /// Job this log belongs to
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Append an event and return its index
    ///
    /// Once a terminal `status` has been logged only `log` events are
    /// accepted; anything else fails with [`Error::JobClosed`].
    pub fn publish(&self, event: Event) -> Result<u64> {
        let mut state = self.state.lock();

        if let Some(terminal) = state.terminal
            && !event.is_log()
        {
            return Err(Error::JobClosed {
                job_id: self.job_id.to_string(),
                reason: format!("job already {}, rejected '{}' event", terminal, event.kind()),
            });
        }

        if let Event::Status { status, .. } = &event
            && status.is_terminal()
        {
            state.terminal = Some(*status);
            state.finished_at = Some(Instant::now());
        }

        let index = state.events.len() as u64;
        let indexed = IndexedEvent { index, event };
        if let Some(live) = &state.live {
            // No receivers is fine
            let _ = live.send(indexed.clone());
        }
        state.events.push(indexed);
        Ok(index)
    }

    /// Events with index >= `since`, plus the index to ask for next
    pub fn replay_since(&self, since: u64) -> (Vec<IndexedEvent>, u64) {
        let state = self.state.lock();
        let len = state.events.len() as u64;
        let start = since.min(len);
        let events: Vec<IndexedEvent> = state.events[start as usize..].to_vec();
        let next_index = events.last().map(|e| e.index + 1).unwrap_or(start);
        (events, next_index)
    }

    /// Live subscription starting at the current end of the log
    pub fn subscribe(self: &Arc<Self>) -> JobSubscription {
        let state = self.state.lock();
        let next = state.events.len() as u64;
        self.subscription_at(&state, next, VecDeque::new())
    }

    /// Subscription that first yields the logged events with index >= `since`
    /// and then continues live, without gaps or duplicates
    pub fn subscribe_since(self: &Arc<Self>, since: u64) -> JobSubscription {
        let state = self.state.lock();
        let len = state.events.len() as u64;
        let start = since.min(len) as usize;
        let backlog: VecDeque<IndexedEvent> = state.events[start..].iter().cloned().collect();
        self.subscription_at(&state, start as u64, backlog)
    }

    fn subscription_at(
        self: &Arc<Self>,
        state: &LogState,
        next: u64,
        pending: VecDeque<IndexedEvent>,
    ) -> JobSubscription {
        JobSubscription {
            log: self.clone(),
            live: state.live.as_ref().map(|tx| tx.subscribe()),
            pending,
            next,
        }
    }

    /// Stop live delivery; subscribers drain what was logged and then end
    pub fn close(&self) {
        self.state.lock().live = None;
    }

    /// Number of events logged
    pub fn len(&self) -> u64 {
        self.state.lock().events.len() as u64
    }

    /// Whether nothing was logged yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Terminal status, once one was logged
    pub fn terminal_status(&self) -> Option<JobStatus> {
        self.state.lock().terminal
    }

    fn expired(&self, grace: Duration) -> bool {
        self.state
            .lock()
            .finished_at
            .is_some_and(|finished| finished.elapsed() >= grace)
    }
}

/// Live view of a job log
///
/// Yields events in index order. When the subscriber falls behind the
/// broadcast buffer, missed events are read back from the log.
pub struct JobSubscription {
    log: Arc<JobLog>,
    live: Option<broadcast::Receiver<IndexedEvent>>,
    pending: VecDeque<IndexedEvent>,
    next: u64,
}

impl JobSubscription {
    /// Next event, or `None` once the log was closed and fully delivered
    pub async fn recv(&mut self) -> Option<IndexedEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                if event.index < self.next {
                    continue;
                }
                self.next = event.index + 1;
                return Some(event);
            }

            let Some(live) = self.live.as_mut() else {
                return self.drain_log();
            };

            let received = live.recv().await;
            match received {
                Ok(event) if event.index < self.next => continue,
                Ok(event) if event.index == self.next => {
                    self.next += 1;
                    return Some(event);
                }
                Ok(event) => {
                    // Out of step with the log; refill from it
                    self.backfill();
                    self.pending.push_back(event);
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::debug!(job_id = %self.log.job_id, missed, "Subscriber lagged, back-filling from log");
                    self.backfill();
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.live = None;
                }
            }
        }
    }

    fn backfill(&mut self) {
        let (events, _) = self.log.replay_since(self.next);
        self.pending.extend(events);
    }

    fn drain_log(&mut self) -> Option<IndexedEvent> {
        self.backfill();
        let event = self.pending.pop_front()?;
        self.next = event.index + 1;
        Some(event)
    }

    /// Index of the next event this subscription will yield
    pub fn next_index(&self) -> u64 {
        self.next
    }
}

/// Registry of job logs
pub struct EventBroker {
    logs: RwLock<HashMap<JobId, Arc<JobLog>>>,
    live_capacity: usize,
}

impl EventBroker {
    /// Create a broker whose live channels buffer `live_capacity` events
    pub fn new(live_capacity: usize) -> Self {
        Self {
            logs: RwLock::new(HashMap::new()),
            live_capacity,
        }
    }

    /// Log for `job_id`, created on first use
    pub fn open(&self, job_id: JobId) -> Arc<JobLog> {
        if let Some(log) = self.logs.read().get(&job_id) {
            return log.clone();
        }
        self.logs
            .write()
            .entry(job_id)
            .or_insert_with(|| Arc::new(JobLog::new(job_id, self.live_capacity)))
            .clone()
    }

    /// Existing log for `job_id`
    pub fn get(&self, job_id: JobId) -> Result<Arc<JobLog>> {
        self.logs
            .read()
            .get(&job_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))
    }

    /// Append an event to a job's log
    pub fn publish(&self, job_id: JobId, event: Event) -> Result<u64> {
        self.get(job_id)?.publish(event)
    }

    /// Live subscription from now on
    pub fn subscribe(&self, job_id: JobId) -> Result<JobSubscription> {
        Ok(self.get(job_id)?.subscribe())
    }

    /// Subscription that replays from `since` and then continues live
    pub fn subscribe_since(&self, job_id: JobId, since: u64) -> Result<JobSubscription> {
        Ok(self.get(job_id)?.subscribe_since(since))
    }

    /// Events with index >= `since` and the next index to request
    pub fn replay_since(&self, job_id: JobId, since: u64) -> Result<(Vec<IndexedEvent>, u64)> {
        Ok(self.get(job_id)?.replay_since(since))
    }

    /// Drop logs of jobs that finished more than `grace` ago
    pub fn reap_expired(&self, grace: Duration) -> Vec<JobId> {
        let expired: Vec<JobId> = self
            .logs
            .read()
            .iter()
            .filter(|(_, log)| log.expired(grace))
            .map(|(id, _)| *id)
            .collect();

        if !expired.is_empty() {
            let mut logs = self.logs.write();
            for id in &expired {
                if let Some(log) = logs.remove(id) {
                    log.close();
                }
            }
            tracing::debug!(count = expired.len(), "Reaped expired job logs");
        }
        expired
    }

    /// Number of retained logs
    pub fn len(&self) -> usize {
        self.logs.read().len()
    }

    /// Whether no logs are retained
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
