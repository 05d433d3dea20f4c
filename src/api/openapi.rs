//! OpenAPI documentation and schema generation
//!
//! The specification is generated at compile time with utoipa and served at
//! `/openapi.json` (and through Swagger UI when enabled).

use utoipa::OpenApi;

/// OpenAPI documentation for the bunkr-dl REST API
#[derive(OpenApi)]
#[openapi(
    info(
        title = "bunkr-dl REST API",
        version = "0.1.0",
        description = "Submit Bunkr album and file downloads, follow their event streams and cancel them",
        license(
            name = "MIT OR Apache-2.0"
        )
    ),
    servers(
        (url = "http://localhost:8000/api/v1", description = "Local development server")
    ),
    paths(
        // Jobs
        crate::api::routes::submit_download,
        crate::api::routes::list_downloads,
        crate::api::routes::get_download,
        crate::api::routes::cancel_download,
        crate::api::routes::replay_events,
        crate::api::routes::event_stream,

        // System
        crate::api::routes::health_check,
        crate::api::routes::openapi_spec,
        crate::api::routes::list_directories,
        crate::api::routes::settings_defaults,
    ),
    components(
        schemas(
            crate::types::JobId,
            crate::types::JobRequest,
            crate::types::JobInfo,
            crate::types::JobStatus,
            crate::types::LogLevel,
            crate::types::Event,
            crate::types::IndexedEvent,
            crate::types::TaskInfo,
            crate::types::TaskPatch,
            crate::config::MaintenanceStrategy,
            crate::config::NetworkConfig,
            crate::config::NetworkOverrides,
            crate::utils::DirectoryListing,
            crate::error::ApiError,
            crate::error::ErrorDetail,
            crate::api::routes::SubmitResponse,
            crate::api::routes::EventsResponse,
            crate::api::routes::EventsQuery,
            crate::api::routes::DirectoriesQuery,
        )
    ),
    tags(
        (name = "downloads", description = "Job submission, inspection, cancellation and events"),
        (name = "system", description = "Health, OpenAPI, directory browsing and defaults")
    )
)]
pub struct ApiDoc;
