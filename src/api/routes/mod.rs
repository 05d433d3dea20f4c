//! Route handlers for the REST API
//!
//! Handlers are organized by domain:
//! - [`downloads`] - Job submission, inspection, cancellation and events
//! - [`system`] - Health, OpenAPI, directory browsing, defaults

use serde::{Deserialize, Serialize};

mod downloads;
mod system;

pub use downloads::*;
pub use system::*;

// ============================================================================
// Query/Response Types (shared across handlers)
// ============================================================================

/// Query parameters for the event replay and stream endpoints
#[derive(Debug, Default, Deserialize, Serialize, utoipa::ToSchema)]
pub struct EventsQuery {
    /// First event index to return (default: 0)
    #[serde(default)]
    pub since: u64,
}

/// Query parameters for GET /directories
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DirectoriesQuery {
    /// Directory to list (default: the configured download directory)
    pub base_path: Option<String>,
}

/// Response for POST /downloads
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct SubmitResponse {
    /// Identifier of the new job
    pub job_id: crate::types::JobId,
}

/// Response for GET /downloads/:id/events
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct EventsResponse {
    /// Events with `index >= since`, in order
    pub events: Vec<crate::types::IndexedEvent>,
    /// Index to pass as `since` on the next poll
    pub next_index: u64,
}
