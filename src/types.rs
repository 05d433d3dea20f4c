//! Core types for bunkr-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::{MaintenanceStrategy, NetworkOverrides};

/// Unique identifier for a job (UUID v4, rendered as simple hex)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(into = "String", try_from = "String")]
#[schema(value_type = String)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Generate a fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for JobId {
    type Error = uuid::Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// One downloadable item, produced by the resolver and never mutated afterwards
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DownloadDescriptor {
    /// Item page the descriptor was resolved from
    pub source_url: String,
    /// Decrypted direct download URL
    pub resolved_url: String,
    /// Sanitized filename (never contains path separators)
    pub filename: String,
    /// Edge subdomain serving `resolved_url` (lowercased first host label)
    pub subdomain: String,
    /// Size announced by the item page, when known
    pub expected_size: Option<u64>,
}

/// Verbosity of a job's `log` event stream
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Everything, including per-chunk and per-page diagnostics
    Debug,
    /// Normal progress messages
    #[default]
    Info,
    /// Recoverable problems
    Warning,
    /// Failures only
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Request to download one or more album/item URLs
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct JobRequest {
    /// Album or item URLs, processed in order
    pub urls: Vec<String>,

    /// Only download files whose name contains one of these substrings
    #[serde(default)]
    pub include: Vec<String>,

    /// Skip files whose name contains one of these substrings (wins over include)
    #[serde(default)]
    pub ignore: Vec<String>,

    /// Base directory overriding the configured download root
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub custom_path: Option<PathBuf>,

    /// Skip the free-space guard
    #[serde(default)]
    pub disable_disk_check: bool,

    /// Never consult the status page
    #[serde(default)]
    pub disable_status_check: bool,

    /// Override the status cache TTL in seconds
    #[serde(default)]
    pub status_cache_ttl_secs: Option<u64>,

    /// Override the configured maintenance strategy
    #[serde(default)]
    pub maintenance_strategy: Option<MaintenanceStrategy>,

    /// Concurrent item downloads (None = configured default)
    #[serde(default)]
    pub max_workers: Option<usize>,

    /// Verbosity of the job's log events
    #[serde(default)]
    pub log_level: LogLevel,

    /// Network overrides applied to this job only
    #[serde(default)]
    pub network: Option<NetworkOverrides>,
}

impl JobRequest {
    /// Request with default options for the given URLs
    pub fn new(urls: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            urls: urls.into_iter().map(Into::into).collect(),
            include: Vec::new(),
            ignore: Vec::new(),
            custom_path: None,
            disable_disk_check: false,
            disable_status_check: false,
            status_cache_ttl_secs: None,
            maintenance_strategy: None,
            max_workers: None,
            log_level: LogLevel::default(),
            network: None,
        }
    }
}

/// Lifecycle of a job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Accepted, not started yet
    Pending,
    /// Resolving or downloading
    Running,
    /// Every item complete or skipped
    Completed,
    /// At least one item failed, or the job aborted
    Failed,
    /// Cancelled by a caller or by shutdown
    Cancelled,
}

impl JobStatus {
    /// Whether no further status change may follow
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Progress row for one descriptor
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TaskInfo {
    /// Task id, unique within the job
    pub id: u64,
    /// Display label (`File n/total`)
    pub label: String,
    /// Completion percentage (0.0 to 100.0)
    pub completed: f64,
    /// Whether the row should be rendered
    pub visible: bool,
}

/// Partial task update; absent fields are unchanged
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TaskPatch {
    /// Task id
    pub id: u64,
    /// New label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// New completion percentage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<f64>,
    /// New visibility
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible: Option<bool>,
}

/// Operational state of an edge subdomain as reported by the status page
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    /// Serving files normally
    Operational,
    /// Announced maintenance window
    Maintenance,
    /// Listed, but neither operational nor in maintenance
    Offline,
    /// Status page unreachable or subdomain not listed
    Unknown,
}

/// Cached status entry for one subdomain
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SubdomainStatus {
    /// Lowercased subdomain name (e.g. `cdn12`)
    pub subdomain: String,
    /// Classified status
    pub status: ServerStatus,
    /// Status text as printed on the status page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_status: Option<String>,
    /// When the status was fetched
    pub checked_at: DateTime<Utc>,
}

impl SubdomainStatus {
    /// Status not backed by a fetch (disabled checks or fetch failure)
    pub fn synthetic(subdomain: &str, status: ServerStatus) -> Self {
        Self {
            subdomain: subdomain.to_string(),
            status,
            raw_status: None,
            checked_at: Utc::now(),
        }
    }
}

/// Event emitted into a job's log
///
/// Serialized with a `type` tag so push and pull consumers see the same shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Job status transition
    Status {
        /// New status
        status: JobStatus,
        /// Optional explanation (error text for failures)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        /// When the transition happened
        timestamp: DateTime<Utc>,
    },

    /// Overall progress for the URL being processed
    Overall {
        /// What is being downloaded (album name or URL)
        description: String,
        /// Finished tasks
        completed: u64,
        /// Total tasks
        total: u64,
    },

    /// A task row was created
    TaskCreated {
        /// Initial task state
        task: TaskInfo,
    },

    /// A task row changed
    TaskUpdated {
        /// Changed fields
        task: TaskPatch,
    },

    /// Human-readable timeline entry
    Log {
        /// Short event title
        event: String,
        /// Details (URL, subdomain, reason)
        details: String,
        /// When it was logged
        timestamp: DateTime<Utc>,
        /// Component that produced the entry
        origin: String,
    },

    /// A subdomain reported maintenance and the job reacted to it
    MaintenanceDetected {
        /// Affected subdomain
        subdomain: String,
        /// Raw status text
        status: String,
    },
}

impl Event {
    /// Build a status event stamped with the current time
    pub fn status(status: JobStatus, message: Option<String>) -> Self {
        Event::Status {
            status,
            message,
            timestamp: Utc::now(),
        }
    }

    /// Build a log event stamped with the current time
    pub fn log(
        event: impl Into<String>,
        details: impl Into<String>,
        origin: impl Into<String>,
    ) -> Self {
        Event::Log {
            event: event.into(),
            details: details.into(),
            timestamp: Utc::now(),
            origin: origin.into(),
        }
    }

    /// Whether this is a `log` event (the only kind accepted after a terminal status)
    pub fn is_log(&self) -> bool {
        matches!(self, Event::Log { .. })
    }

    /// Name used for the SSE `event:` field
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Status { .. } => "status",
            Event::Overall { .. } => "overall",
            Event::TaskCreated { .. } => "task_created",
            Event::TaskUpdated { .. } => "task_updated",
            Event::Log { .. } => "log",
            Event::MaintenanceDetected { .. } => "maintenance_detected",
        }
    }
}

/// Event with its position in the job log
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct IndexedEvent {
    /// 0-based, gap-free index within the job
    pub index: u64,
    /// The event itself, flattened next to `index`
    #[serde(flatten)]
    pub event: Event,
}

/// Result of one writer invocation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The final file is in place
    Complete {
        /// Bytes in the final file
        bytes: u64,
    },
    /// The `.part` file was kept after an interruption
    Partial {
        /// Bytes in the `.part` file
        bytes: u64,
    },
    /// A complete file already existed; nothing was downloaded
    Skipped,
}

/// Result of one retry-controlled attempt at a descriptor
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Downloaded (or resumed) successfully
    Complete,
    /// Not downloaded on purpose (existing file, filter, maintenance skip)
    Skipped(String),
    /// Gave up on this attempt
    Failed {
        /// What went wrong
        reason: String,
        /// Whether the scheduler's sweep should try again
        retryable: bool,
    },
    /// The job was cancelled mid-attempt
    Cancelled,
}

/// Aggregated result of a scheduler run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct JobOutcome {
    /// Items downloaded
    pub complete: usize,
    /// Items skipped (existing, filtered, maintenance)
    pub skipped: usize,
    /// Items still failed after the sweep, with reasons
    pub failed: Vec<FailedItem>,
    /// Whether cancellation stopped the run
    pub cancelled: bool,
}

impl JobOutcome {
    /// Terminal status implied by this outcome
    pub fn status(&self) -> JobStatus {
        if self.cancelled {
            JobStatus::Cancelled
        } else if !self.failed.is_empty() {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        }
    }

    /// Fold another run's outcome into this one
    pub fn merge(&mut self, other: JobOutcome) {
        self.complete += other.complete;
        self.skipped += other.skipped;
        self.failed.extend(other.failed);
        self.cancelled |= other.cancelled;
    }
}

/// An item that could not be downloaded
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FailedItem {
    /// Source URL of the item
    pub url: String,
    /// Last failure reason
    pub reason: String,
}

/// Snapshot of a job for listings
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct JobInfo {
    /// Job id
    pub job_id: JobId,
    /// Current status
    pub status: JobStatus,
    /// When the job was submitted
    pub created_at: DateTime<Utc>,
    /// When the job reached a terminal status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// URLs from the request
    pub urls: Vec<String>,
    /// Job-level error, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Number of events logged so far
    pub event_count: u64,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indexed_event_serializes_flat_with_type_tag() {
        let event = IndexedEvent {
            index: 4,
            event: Event::MaintenanceDetected {
                subdomain: "cdn12".into(),
                status: "Under maintenance".into(),
            },
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["index"], 4);
        assert_eq!(json["type"], "maintenance_detected");
        assert_eq!(json["subdomain"], "cdn12");

        let back: IndexedEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn task_patch_omits_unchanged_fields() {
        let event = Event::TaskUpdated {
            task: TaskPatch {
                id: 2,
                completed: Some(50.0),
                ..Default::default()
            },
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "task_updated");
        assert_eq!(json["task"]["completed"], 50.0);
        assert!(
            json["task"].get("label").is_none(),
            "unchanged label must not be serialized"
        );
    }

    #[test]
    fn job_id_displays_as_simple_hex_and_parses_back() {
        let id = JobId::new();
        let text = id.to_string();
        assert_eq!(text.len(), 32);
        assert!(!text.contains('-'));
        assert_eq!(text.parse::<JobId>().unwrap(), id);
        assert_eq!(serde_json::to_value(id).unwrap(), text);
        let back: JobId = serde_json::from_value(serde_json::Value::String(text)).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn job_request_defaults_from_minimal_json() {
        let request: JobRequest =
            serde_json::from_str(r#"{"urls": ["https://bunkr.cr/a/abc"]}"#).unwrap();
        assert!(request.include.is_empty());
        assert!(!request.disable_disk_check);
        assert_eq!(request.log_level, LogLevel::Info);
        assert_eq!(request.max_workers, None);
    }

    #[test]
    fn job_outcome_status_precedence() {
        let mut outcome = JobOutcome {
            complete: 3,
            ..Default::default()
        };
        assert_eq!(outcome.status(), JobStatus::Completed);

        outcome.failed.push(FailedItem {
            url: "https://bunkr.cr/f/x".into(),
            reason: "HTTP 404".into(),
        });
        assert_eq!(outcome.status(), JobStatus::Failed);

        outcome.cancelled = true;
        assert_eq!(outcome.status(), JobStatus::Cancelled);
    }

    #[test]
    fn only_terminal_statuses_are_terminal() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn log_level_ordering_gates_debug() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert_eq!(LogLevel::Warning.to_string(), "WARNING");
    }
}
