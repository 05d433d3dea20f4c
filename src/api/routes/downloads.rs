//! Job handlers.

use super::{EventsQuery, EventsResponse, SubmitResponse};
use crate::api::AppState;
use crate::error::Result;
use crate::types::{JobId, JobInfo, JobRequest};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        IntoResponse,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
};
use futures::stream::{self, Stream, StreamExt};
use std::convert::Infallible;

/// POST /downloads - Submit a job
#[utoipa::path(
    post,
    path = "/api/v1/downloads",
    tag = "downloads",
    request_body = crate::types::JobRequest,
    responses(
        (status = 201, description = "Job accepted", body = SubmitResponse),
        (status = 400, description = "Invalid request", body = crate::error::ApiError),
        (status = 503, description = "Shutting down", body = crate::error::ApiError)
    )
)]
pub async fn submit_download(
    State(state): State<AppState>,
    Json(request): Json<JobRequest>,
) -> Result<impl IntoResponse> {
    let job_id = state.downloader.submit(request).await?;
    Ok((StatusCode::CREATED, Json(SubmitResponse { job_id })))
}

/// GET /downloads - List jobs
#[utoipa::path(
    get,
    path = "/api/v1/downloads",
    tag = "downloads",
    responses(
        (status = 200, description = "All retained jobs, oldest first", body = Vec<crate::types::JobInfo>)
    )
)]
pub async fn list_downloads(State(state): State<AppState>) -> Json<Vec<JobInfo>> {
    Json(state.downloader.list_jobs())
}

/// GET /downloads/:id - Get a single job
#[utoipa::path(
    get,
    path = "/api/v1/downloads/{id}",
    tag = "downloads",
    params(
        ("id" = String, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Job information", body = crate::types::JobInfo),
        (status = 404, description = "Job not found", body = crate::error::ApiError)
    )
)]
pub async fn get_download(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> Result<Json<JobInfo>> {
    Ok(Json(state.downloader.get_job(id)?))
}

/// DELETE /downloads/:id - Cancel a job
#[utoipa::path(
    delete,
    path = "/api/v1/downloads/{id}",
    tag = "downloads",
    params(
        ("id" = String, Path, description = "Job ID")
    ),
    responses(
        (status = 204, description = "Cancellation requested"),
        (status = 404, description = "Job not found", body = crate::error::ApiError),
        (status = 409, description = "Job already finished", body = crate::error::ApiError)
    )
)]
pub async fn cancel_download(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> Result<StatusCode> {
    state.downloader.cancel(id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /downloads/:id/events - Replay the job's events
#[utoipa::path(
    get,
    path = "/api/v1/downloads/{id}/events",
    tag = "downloads",
    params(
        ("id" = String, Path, description = "Job ID"),
        ("since" = Option<u64>, Query, description = "First event index to return (default: 0)")
    ),
    responses(
        (status = 200, description = "Events from `since` onwards", body = EventsResponse),
        (status = 404, description = "Job not found", body = crate::error::ApiError)
    )
)]
pub async fn replay_events(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<EventsResponse>> {
    let (events, next_index) = state.downloader.replay_since(id, query.since)?;
    Ok(Json(EventsResponse { events, next_index }))
}

/// GET /downloads/:id/stream - Server-sent events stream
///
/// Starts at `since` (default 0), so a reconnecting client passes the last
/// index it saw plus one. The stream ends after the job's terminal status.
#[utoipa::path(
    get,
    path = "/api/v1/downloads/{id}/stream",
    tag = "downloads",
    params(
        ("id" = String, Path, description = "Job ID"),
        ("since" = Option<u64>, Query, description = "First event index to return (default: 0)")
    ),
    responses(
        (status = 200, description = "Server-sent events stream (text/event-stream)", content_type = "text/event-stream"),
        (status = 404, description = "Job not found", body = crate::error::ApiError)
    )
)]
pub async fn event_stream(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
    Query(query): Query<EventsQuery>,
) -> Result<Sse<impl Stream<Item = std::result::Result<SseEvent, Infallible>>>> {
    let subscription = state.downloader.subscribe_since(id, query.since)?;

    let events = stream::unfold(subscription, |mut subscription| async move {
        let event = subscription.recv().await?;
        Some((event, subscription))
    });

    let sse_stream = events.filter_map(|event| async move {
        match serde_json::to_string(&event) {
            Ok(json_data) => Some(Ok(SseEvent::default()
                .event(event.event.kind())
                .id(event.index.to_string())
                .data(json_data))),
            Err(e) => {
                tracing::warn!(index = event.index, error = %e, "Failed to serialize event to JSON");
                None
            }
        }
    });

    Ok(Sse::new(sse_stream).keep_alive(KeepAlive::default()))
}
