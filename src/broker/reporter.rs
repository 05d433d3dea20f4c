//! Translates job progress into events on the job's log

use super::{JobLog, SessionLog};
use crate::types::{Event, JobId, JobStatus, LogLevel, TaskInfo, TaskPatch};
use crate::utils::format_elapsed;
use crate::writer::ProgressEstimator;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

struct TaskEntry {
    completed: f64,
    visible: bool,
    finished: bool,
    length_unknown_noted: bool,
    estimator: ProgressEstimator,
}

#[derive(Default)]
struct Overall {
    description: String,
    total: u64,
    completed: u64,
}

#[derive(Default)]
struct ReporterState {
    next_task_id: u64,
    overall: Overall,
    tasks: HashMap<u64, TaskEntry>,
}

/// Event producer for one job
///
/// Keeps the task table and the overall counter so `overall` events always
/// reflect the number of finished tasks. Events rejected by a closed log are
/// dropped with a debug trace.
pub struct JobReporter {
    job_id: JobId,
    log: Arc<JobLog>,
    log_level: LogLevel,
    session_log: Option<Arc<SessionLog>>,
    started_at: Instant,
    state: Mutex<ReporterState>,
}

impl JobReporter {
    /// Reporter writing into `log`
    pub fn new(log: Arc<JobLog>, log_level: LogLevel, session_log: Option<Arc<SessionLog>>) -> Self {
        Self {
            job_id: log.job_id(),
            log,
            log_level,
            session_log,
            started_at: Instant::now(),
            state: Mutex::new(ReporterState::default()),
        }
    }

    /// Job being reported
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    fn publish(&self, event: Event) {
        if let Err(e) = self.log.publish(event) {
            tracing::debug!(job_id = %self.job_id, error = %e, "Event dropped");
        }
    }

    /// Publish a status transition
    pub fn status(&self, status: JobStatus, message: Option<String>) {
        self.publish(Event::status(status, message));
    }

    /// Timeline entry
    pub fn log(&self, event: impl Into<String>, details: impl Into<String>, origin: &str) {
        self.publish(Event::log(event, details, origin));
    }

    /// Timeline entry shown only when the job runs at debug level
    pub fn debug(&self, event: impl Into<String>, details: impl Into<String>, origin: &str) {
        if self.log_level <= LogLevel::Debug {
            self.publish(Event::log(event, details, origin));
        }
    }

    /// Opening entries of a job timeline
    pub fn started(&self) {
        self.log("Script started", "The script has started execution.", "job");
        self.log(
            "Log level",
            format!("Using {} verbosity.", self.log_level),
            "job",
        );
    }

    /// Closing entry with the elapsed time
    pub fn ended(&self) {
        self.log(
            "Script ended",
            format!(
                "The script has finished execution. Execution time: {}",
                format_elapsed(self.started_at.elapsed())
            ),
            "job",
        );
    }

    /// Start a new overall counter for `total` tasks
    pub fn overall(&self, description: impl Into<String>, total: u64) {
        let description = description.into();
        {
            let mut state = self.state.lock();
            state.overall = Overall {
                description: description.clone(),
                total,
                completed: 0,
            };
        }
        self.publish(Event::Overall {
            description,
            completed: 0,
            total,
        });
    }

    /// Create a task row for the item at `position` (0-based) and return its id
    pub fn add_task(&self, position: usize) -> u64 {
        let task = {
            let mut state = self.state.lock();
            let id = state.next_task_id;
            state.next_task_id += 1;
            let total = state.overall.total.max(position as u64 + 1);
            state.tasks.insert(
                id,
                TaskEntry {
                    completed: 0.0,
                    visible: true,
                    finished: false,
                    length_unknown_noted: false,
                    estimator: ProgressEstimator::default(),
                },
            );
            TaskInfo {
                id,
                label: format!("File {}/{}", position + 1, total),
                completed: 0.0,
                visible: true,
            }
        };
        let id = task.id;
        self.publish(Event::TaskCreated { task });
        id
    }

    /// Writer progress for a task; publishes when the whole percentage moves
    ///
    /// The first report without a total adds a one-time note that progress
    /// is estimated.
    pub fn task_progress(&self, id: u64, bytes: u64, total: Option<u64>) {
        let (note_unknown_length, completed) = {
            let mut state = self.state.lock();
            let Some(task) = state.tasks.get_mut(&id) else {
                return;
            };
            if task.finished {
                return;
            }
            let note = total.is_none() && !task.length_unknown_noted;
            task.length_unknown_noted |= note;

            let previous = task.completed;
            let next = task.estimator.update(bytes, total).min(99.9);
            if next.floor() > previous.floor() {
                task.completed = next;
                (note, Some(next))
            } else {
                (note, None)
            }
        };

        if note_unknown_length {
            self.log(
                "Download progress",
                "Server did not provide a content length. Progress will be estimated.",
                "job",
            );
        }
        let Some(completed) = completed else {
            return;
        };

        self.publish(Event::TaskUpdated {
            task: TaskPatch {
                id,
                completed: Some(completed),
                ..Default::default()
            },
        });
    }

    /// Mark a task as done; counts towards the overall progress
    pub fn finish_task(&self, id: u64, visible: bool) {
        let overall = {
            let mut state = self.state.lock();
            let Some(task) = state.tasks.get_mut(&id) else {
                return;
            };
            if task.finished {
                return;
            }
            task.finished = true;
            task.completed = 100.0;
            task.visible = visible;

            if state.overall.total > 0 {
                state.overall.completed = (state.overall.completed + 1).min(state.overall.total);
                Some(Event::Overall {
                    description: state.overall.description.clone(),
                    completed: state.overall.completed,
                    total: state.overall.total,
                })
            } else {
                None
            }
        };

        if let Some(overall) = overall {
            self.publish(overall);
        }
        self.publish(Event::TaskUpdated {
            task: TaskPatch {
                id,
                completed: Some(100.0),
                visible: Some(visible),
                ..Default::default()
            },
        });
    }

    /// Hide a task without completing it (failed or cancelled items)
    pub fn hide_task(&self, id: u64) {
        {
            let mut state = self.state.lock();
            let Some(task) = state.tasks.get_mut(&id) else {
                return;
            };
            if !task.visible {
                return;
            }
            task.visible = false;
        }
        self.publish(Event::TaskUpdated {
            task: TaskPatch {
                id,
                visible: Some(false),
                ..Default::default()
            },
        });
    }

    /// Maintenance signal: event, timeline entry and session log line
    pub async fn maintenance_detected(&self, subdomain: &str, status: &str, url: &str) {
        tracing::warn!(job_id = %self.job_id, subdomain, status, url, "Maintenance detected");
        self.publish(Event::MaintenanceDetected {
            subdomain: subdomain.to_string(),
            status: status.to_string(),
        });
        self.log(
            "Maintenance detected",
            format!("{} is under maintenance: {}.", subdomain, status),
            "retry",
        );
        if let Some(session_log) = &self.session_log
            && let Err(e) = session_log.log_maintenance(subdomain, status, url).await
        {
            tracing::warn!(error = %e, "Failed to write session log");
        }
    }

    /// Record a problematic URL in the session log
    pub async fn session_note(&self, url: &str) {
        if let Some(session_log) = &self.session_log
            && let Err(e) = session_log.log_url(url).await
        {
            tracing::warn!(error = %e, "Failed to write session log");
        }
    }
}
