//! System handlers: health, OpenAPI, directory browsing, defaults.

use super::DirectoriesQuery;
use crate::api::AppState;
use crate::config::NetworkConfig;
use crate::error::Result;
use crate::utils::{self, DirectoryListing};
use axum::{
    Json,
    extract::{Query, State},
    response::IntoResponse,
};
use serde_json::json;
use std::path::PathBuf;

/// GET /health - Health check
#[utoipa::path(
    get,
    path = "/api/v1/health",
    tag = "system",
    responses(
        (status = 200, description = "Service is healthy")
    )
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "jobs": state.downloader.list_jobs().len(),
    }))
}

/// GET /openapi.json - OpenAPI specification
#[utoipa::path(
    get,
    path = "/api/v1/openapi.json",
    tag = "system",
    responses(
        (status = 200, description = "OpenAPI 3.1 specification in JSON format")
    )
)]
pub async fn openapi_spec() -> impl IntoResponse {
    use crate::api::openapi::ApiDoc;
    use utoipa::OpenApi;

    Json(ApiDoc::openapi())
}

/// GET /directories - List subdirectories for a path picker
#[utoipa::path(
    get,
    path = "/api/v1/directories",
    tag = "system",
    params(
        ("basePath" = Option<String>, Query, description = "Directory to list (default: download directory)")
    ),
    responses(
        (status = 200, description = "Sorted subdirectory names", body = crate::utils::DirectoryListing),
        (status = 422, description = "Path missing or outside the allowed root", body = crate::error::ApiError)
    )
)]
pub async fn list_directories(
    State(state): State<AppState>,
    Query(query): Query<DirectoriesQuery>,
) -> Result<Json<DirectoryListing>> {
    let base = query
        .base_path
        .filter(|path| !path.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| state.config.download.download_dir.clone());

    let listing = utils::list_directories(&base, state.config.api.browse_root.as_deref()).await?;
    Ok(Json(listing))
}

/// GET /settings/defaults - Network defaults a front-end can prefill
#[utoipa::path(
    get,
    path = "/api/v1/settings/defaults",
    tag = "system",
    responses(
        (status = 200, description = "Configured network settings", body = crate::config::NetworkConfig)
    )
)]
pub async fn settings_defaults(State(state): State<AppState>) -> Json<NetworkConfig> {
    Json(state.config.network.clone())
}
