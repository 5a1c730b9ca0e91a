//! Job management REST endpoints
//!
//! CRUD over the in-memory job store plus a server-sent-events stream of the
//! job event bus. The SSE stream optionally filters on one job and, when it
//! does, ends with an explicit `complete` event once that job goes terminal.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AppState;
use crate::jobs::{Job, JobError, JobKind, JobStatus, Subscription, TransitionFields};

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn job_error_response(error: JobError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match error {
        JobError::QueueFull => StatusCode::CONFLICT,
        JobError::NotFound => StatusCode::NOT_FOUND,
        JobError::AlreadyFinished | JobError::NotFinished => StatusCode::CONFLICT,
    };
    error_response(status, error.to_string())
}

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub url: String,
    /// Explicit kind; detected from the URL when omitted.
    pub kind: Option<JobKind>,
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<Job>,
}

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub cleared: usize,
}

/// Create a job for a URL. Returns 409 when the queue is at capacity with no
/// finished job to evict.
async fn create_job(
    State(state): State<AppState>,
    Json(body): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<Job>), (StatusCode, Json<ErrorResponse>)> {
    if url::Url::parse(&body.url).is_err() {
        return Err(error_response(StatusCode::BAD_REQUEST, "Invalid URL"));
    }
    let kind = body.kind.unwrap_or_else(|| JobKind::detect(&body.url));
    match state.executor.submit(&body.url, kind) {
        Ok(job) => Ok((StatusCode::CREATED, Json(job))),
        Err(e) => Err(job_error_response(e)),
    }
}

async fn list_jobs(State(state): State<AppState>) -> Json<JobListResponse> {
    Json(JobListResponse {
        jobs: state.store.get_all(),
    })
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Job>, (StatusCode, Json<ErrorResponse>)> {
    state
        .store
        .get(id)
        .map(Json)
        .ok_or_else(|| job_error_response(JobError::NotFound))
}

/// Cancel a job. A running job gets its cancel token signalled and its
/// status set; a pending job is cancelled directly in the store.
async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ActionResponse>, (StatusCode, Json<ErrorResponse>)> {
    if state.executor.cancel(id) {
        let _ = state.store.transition(
            id,
            JobStatus::Cancelled,
            TransitionFields {
                message: Some("Cancellation requested".to_string()),
                ..Default::default()
            },
        );
    } else {
        state.store.cancel_pending(id).map_err(job_error_response)?;
    }
    Ok(Json(ActionResponse {
        message: "Job cancelled".to_string(),
    }))
}

async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    state.store.delete(id).map_err(job_error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn clear_jobs(State(state): State<AppState>) -> Json<ClearResponse> {
    Json(ClearResponse {
        cleared: state.store.clear_finished(),
    })
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Restrict the stream to one job and close it after that job finishes.
    pub job_id: Option<Uuid>,
}

enum EventStream {
    Open(Subscription),
    Finishing,
    Done,
}

/// SSE stream of job events.
async fn job_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.bus.subscribe();
    let filter = query.job_id;

    let stream = futures::stream::unfold(EventStream::Open(subscription), move |stream| async move {
        match stream {
            EventStream::Open(mut subscription) => loop {
                let message = subscription.recv().await;
                if let Some(job_id) = filter {
                    if message.job_id != Some(job_id) {
                        continue;
                    }
                    if message.terminal {
                        // Deliver the terminal event, then the close marker.
                        let event = Event::default().data(message.json.clone());
                        return Some((Ok(event), EventStream::Finishing));
                    }
                }
                let event = Event::default().data(message.json.clone());
                return Some((Ok(event), EventStream::Open(subscription)));
            },
            EventStream::Finishing => Some((
                Ok(Event::default().event("complete").data("{}")),
                EventStream::Done,
            )),
            EventStream::Done => None,
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    )
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/jobs", get(list_jobs).post(create_job))
        .route("/jobs/events", get(job_events))
        .route("/jobs/clear", post(clear_jobs))
        .route("/jobs/{id}", get(get_job).delete(delete_job))
        .route("/jobs/{id}/cancel", post(cancel_job))
}
