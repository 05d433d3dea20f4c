//! Error types for bunkr-dl
//!
//! This module provides error handling for the library, including:
//! - Domain-specific error types (resolution, HTTP status, disk space, writes)
//! - Failure classification used by the retry controller
//! - HTTP status code mapping for API integration
//! - Structured error responses with machine-readable error codes

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use utoipa::ToSchema;

/// Result type alias for bunkr-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for bunkr-dl
///
/// Each variant carries enough context (URL, subdomain, path) to be surfaced
/// as a job `log` event without inspecting engine internals.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "max_workers")
        key: Option<String>,
    },

    /// A URL or item could not be resolved into a download descriptor
    #[error("resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    /// Transport-level failure (timeout, reset, connection refused)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The server answered with a non-success status code
    #[error("HTTP {status} for {url}")]
    HttpStatus {
        /// HTTP status code returned by the server
        status: u16,
        /// The URL that was requested
        url: String,
    },

    /// The subdomain serving the file reported a maintenance state
    #[error("subdomain {subdomain} is under maintenance ({status})")]
    MaintenanceDetected {
        /// Subdomain (edge host) under maintenance
        subdomain: String,
        /// Raw status text reported by the status page
        status: String,
    },

    /// Insufficient disk space on the destination volume
    #[error("insufficient disk space: need {required} bytes, have {available} bytes")]
    InsufficientSpace {
        /// Number of bytes required for the job to start
        required: u64,
        /// Number of bytes currently available on disk
        available: u64,
    },

    /// Failed to check disk space
    #[error("failed to check disk space: {0}")]
    DiskSpaceCheckFailed(String),

    /// Invalid filename or destination path
    #[error("filesystem error at {path}: {reason}")]
    Filesystem {
        /// Path that could not be created or written
        path: PathBuf,
        /// The reason the operation failed
        reason: String,
    },

    /// The response body stream ended before the file was complete
    #[error("write interrupted for {path} after {bytes_written} bytes")]
    WriteInterrupted {
        /// The partial (`.part`) file that was preserved
        path: PathBuf,
        /// Number of bytes on disk when the stream broke off
        bytes_written: u64,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Job not found
    #[error("not found: {0}")]
    NotFound(String),

    /// An event was published to a job that already reached a terminal status
    #[error("job {job_id} is closed: {reason}")]
    JobClosed {
        /// The job whose log rejected the event
        job_id: String,
        /// Why the event was rejected
        reason: String,
    },

    /// Shutdown in progress - not accepting new jobs
    #[error("shutdown in progress: not accepting new jobs")]
    ShuttingDown,

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Errors raised while turning a URL into download descriptors
#[derive(Debug, Error)]
pub enum ResolutionError {
    /// The URL path does not look like an album or an item
    #[error("unsupported URL {url}: {reason}")]
    UnsupportedUrl {
        /// The URL that could not be classified
        url: String,
        /// Why classification failed
        reason: String,
    },

    /// The item page did not contain a usable media slug
    #[error("invalid slug for {url}")]
    InvalidSlug {
        /// Item page URL
        url: String,
    },

    /// The encrypted payload was missing or could not be decoded
    #[error("failed to decrypt link for {url}: {reason}")]
    Decryption {
        /// Item page URL
        url: String,
        /// Why decryption failed
        reason: String,
    },

    /// A page could not be fetched (after the fallback domain, if any)
    #[error("failed to fetch {url}: {reason}")]
    PageFetch {
        /// The page URL
        url: String,
        /// Why the fetch failed
        reason: String,
    },
}

/// How a failed download attempt should be treated
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureClass {
    /// Timeouts, resets, truncated bodies, 429/5xx: bounded backoff, then sweep
    Transient,
    /// No response or an edge-down status (502/521): consult the status page
    OutageSuspected,
    /// Client errors and filesystem problems: never retried
    Permanent,
}

impl Error {
    /// Classify this error for the retry controller
    pub fn failure_class(&self) -> FailureClass {
        match self {
            Error::Network(e) => {
                if e.is_timeout() || e.is_body() || e.is_decode() {
                    FailureClass::Transient
                } else if e.is_connect() || e.is_request() {
                    FailureClass::OutageSuspected
                } else if let Some(status) = e.status() {
                    classify_status(status.as_u16())
                } else {
                    FailureClass::Transient
                }
            }
            Error::HttpStatus { status, .. } => classify_status(*status),
            Error::MaintenanceDetected { .. } => FailureClass::OutageSuspected,
            Error::WriteInterrupted { .. } => FailureClass::Transient,
            Error::Io(e) => match e.kind() {
                std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::NotConnected
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::Interrupted
                | std::io::ErrorKind::UnexpectedEof => FailureClass::Transient,
                _ => FailureClass::Permanent,
            },
            Error::Config { .. }
            | Error::Resolution(_)
            | Error::InsufficientSpace { .. }
            | Error::DiskSpaceCheckFailed(_)
            | Error::Filesystem { .. }
            | Error::NotFound(_)
            | Error::JobClosed { .. }
            | Error::ShuttingDown
            | Error::Serialization(_)
            | Error::ApiServerError(_)
            | Error::Other(_) => FailureClass::Permanent,
        }
    }
}

/// Map an HTTP status code to a failure class
///
/// 521 ("web server is down") and 502 point at the edge host itself; 408, 429
/// and the remaining 5xx codes are worth another try; every other client error
/// (404, 410, ...) is permanent.
pub fn classify_status(status: u16) -> FailureClass {
    match status {
        502 | 521 => FailureClass::OutageSuspected,
        408 | 429 => FailureClass::Transient,
        500..=599 => FailureClass::Transient,
        _ => FailureClass::Permanent,
    }
}

/// API error response format
///
/// ```json
/// {
///   "error": {
///     "code": "not_found",
///     "message": "not found: job 3f2a...",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "not_found", "validation_error")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create a "not found" error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new("not_found", format!("{} not found", resource.into()))
    }

    /// Create a "validation error" error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validation_error", message)
    }

    /// Create an "internal server error"
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal_error", message)
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            Error::Config { .. } => 400,
            Error::Resolution(_) => 422,

            Error::NotFound(_) => 404,
            Error::JobClosed { .. } => 409,
            Error::InsufficientSpace { .. } => 422,
            Error::Filesystem { .. } => 422,

            Error::Io(_) => 500,
            Error::ApiServerError(_) => 500,
            Error::DiskSpaceCheckFailed(_) => 500,
            Error::WriteInterrupted { .. } => 500,
            Error::Serialization(_) => 500,
            Error::Other(_) => 500,

            // Upstream site failures
            Error::Network(_) => 502,
            Error::HttpStatus { .. } => 502,

            Error::MaintenanceDetected { .. } => 503,
            Error::ShuttingDown => 503,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Resolution(e) => match e {
                ResolutionError::UnsupportedUrl { .. } => "unsupported_url",
                ResolutionError::InvalidSlug { .. } => "invalid_slug",
                ResolutionError::Decryption { .. } => "decryption_failed",
                ResolutionError::PageFetch { .. } => "page_fetch_failed",
            },
            Error::Network(_) => "network_error",
            Error::HttpStatus { .. } => "http_status",
            Error::MaintenanceDetected { .. } => "maintenance",
            Error::InsufficientSpace { .. } => "insufficient_space",
            Error::DiskSpaceCheckFailed(_) => "disk_space_check_failed",
            Error::Filesystem { .. } => "filesystem_error",
            Error::WriteInterrupted { .. } => "write_interrupted",
            Error::Io(_) => "io_error",
            Error::NotFound(_) => "not_found",
            Error::JobClosed { .. } => "job_closed",
            Error::ShuttingDown => "shutting_down",
            Error::Serialization(_) => "serialization_error",
            Error::ApiServerError(_) => "api_server_error",
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        let details = match &error {
            Error::InsufficientSpace {
                required,
                available,
            } => Some(serde_json::json!({
                "required_bytes": required,
                "available_bytes": available,
            })),
            Error::HttpStatus { status, url } => Some(serde_json::json!({
                "status": status,
                "url": url,
            })),
            Error::MaintenanceDetected { subdomain, status } => Some(serde_json::json!({
                "subdomain": subdomain,
                "status": status,
            })),
            Error::Filesystem { path, .. } => Some(serde_json::json!({
                "path": path,
            })),
            Error::JobClosed { job_id, .. } => Some(serde_json::json!({
                "job_id": job_id,
            })),
            _ => None,
        };

        ApiError {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}
