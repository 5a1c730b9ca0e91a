//! Sync target and sync config REST endpoints

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AppState;
use crate::api::jobs::ErrorResponse;
use crate::db::{CreateSyncTarget, SyncConfigRecord, SyncTargetRecord, UpdateSyncTarget};
use crate::jobs::{JobError, JobKind};

fn error_response(
    status: StatusCode,
    message: impl Into<String>,
) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn internal_error(e: anyhow::Error) -> (StatusCode, Json<ErrorResponse>) {
    error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

#[derive(Debug, Deserialize)]
pub struct CreateTargetRequest {
    pub url: String,
    pub name: String,
    pub thumbnail_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTargetRequest {
    pub name: Option<String>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct TargetListResponse {
    pub targets: Vec<SyncTargetRecord>,
}

#[derive(Debug, Serialize)]
pub struct SyncStartedResponse {
    pub job_ids: Vec<Uuid>,
}

async fn list_targets(
    State(state): State<AppState>,
) -> Result<Json<TargetListResponse>, (StatusCode, Json<ErrorResponse>)> {
    let targets = state.db.sync_targets().list().await.map_err(internal_error)?;
    Ok(Json(TargetListResponse { targets }))
}

async fn create_target(
    State(state): State<AppState>,
    Json(body): Json<CreateTargetRequest>,
) -> Result<(StatusCode, Json<SyncTargetRecord>), (StatusCode, Json<ErrorResponse>)> {
    if url::Url::parse(&body.url).is_err() {
        return Err(error_response(StatusCode::BAD_REQUEST, "Invalid URL"));
    }
    let repo = state.db.sync_targets();
    if repo
        .get_by_url(&body.url)
        .await
        .map_err(internal_error)?
        .is_some()
    {
        return Err(error_response(
            StatusCode::CONFLICT,
            "A sync target with this URL already exists",
        ));
    }
    let target = repo
        .create(CreateSyncTarget {
            url: body.url,
            name: body.name,
            thumbnail_url: body.thumbnail_url,
        })
        .await
        .map_err(internal_error)?;
    Ok((StatusCode::CREATED, Json(target)))
}

async fn update_target(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateTargetRequest>,
) -> Result<Json<SyncTargetRecord>, (StatusCode, Json<ErrorResponse>)> {
    state
        .db
        .sync_targets()
        .update(
            id,
            UpdateSyncTarget {
                name: body.name,
                enabled: body.enabled,
            },
        )
        .await
        .map_err(internal_error)?
        .map(Json)
        .ok_or_else(|| error_response(StatusCode::NOT_FOUND, "Sync target not found"))
}

async fn delete_target(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    let deleted = state
        .db
        .sync_targets()
        .delete(id)
        .await
        .map_err(internal_error)?;
    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(error_response(StatusCode::NOT_FOUND, "Sync target not found"))
    }
}

/// Submit a sync job for one target, regardless of its enabled flag.
async fn sync_target_now(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SyncStartedResponse>, (StatusCode, Json<ErrorResponse>)> {
    let repo = state.db.sync_targets();
    let target = repo
        .get(id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| error_response(StatusCode::NOT_FOUND, "Sync target not found"))?;

    let job = state
        .executor
        .submit(&target.url, JobKind::detect(&target.url))
        .map_err(|e| match e {
            JobError::QueueFull => error_response(StatusCode::CONFLICT, e.to_string()),
            e => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        })?;
    repo.record_sync(target.id, job.id, chrono::Utc::now())
        .await
        .map_err(internal_error)?;

    Ok(Json(SyncStartedResponse {
        job_ids: vec![job.id],
    }))
}

/// Submit sync jobs for every enabled target.
async fn sync_now(State(state): State<AppState>) -> Json<SyncStartedResponse> {
    let job_ids = state.scheduler.sync_all_enabled().await;
    Json(SyncStartedResponse { job_ids })
}

#[derive(Debug, Deserialize)]
pub struct UpdateConfigRequest {
    pub enabled: Option<bool>,
    pub interval_minutes: Option<i64>,
}

async fn get_config(
    State(state): State<AppState>,
) -> Result<Json<SyncConfigRecord>, (StatusCode, Json<ErrorResponse>)> {
    let config = state
        .db
        .sync_targets()
        .get_config()
        .await
        .map_err(internal_error)?;
    Ok(Json(config))
}

async fn update_config(
    State(state): State<AppState>,
    Json(body): Json<UpdateConfigRequest>,
) -> Result<Json<SyncConfigRecord>, (StatusCode, Json<ErrorResponse>)> {
    if body.interval_minutes.is_some_and(|m| m < 1) {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "interval_minutes must be at least 1",
        ));
    }
    let config = state
        .db
        .sync_targets()
        .update_config(body.enabled, body.interval_minutes)
        .await
        .map_err(internal_error)?;
    Ok(Json(config))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/sync/targets", get(list_targets).post(create_target))
        .route(
            "/sync/targets/{id}",
            patch(update_target).delete(delete_target),
        )
        .route("/sync/targets/{id}/sync", post(sync_target_now))
        .route("/sync/now", post(sync_now))
        .route("/sync/config", get(get_config).patch(update_config))
}
