//! Endpoints polled by `gantry-client` workers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use gantry_core::JobId;
use gantry_core::protocol::{
    ClaimRequest, ClaimResponse, JobSnapshot, ReportMessage, ReportReply, WorkerStatus,
};
use tracing::debug;

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/claim", post(claim))
        .route("/jobs/{id}", get(snapshot))
        .route("/jobs/{id}/report", post(report))
        .route("/status", post(worker_status))
}

async fn claim(
    State(state): State<AppState>,
    Json(request): Json<ClaimRequest>,
) -> Result<Json<ClaimResponse>, ApiError> {
    let job = state.dispatcher.claim(&request.worker).await?;
    if job.is_none() {
        debug!(worker = %request.worker.name, "No job available");
    }
    Ok(Json(ClaimResponse { job }))
}

async fn report(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
    Json(message): Json<ReportMessage>,
) -> Result<Json<ReportReply>, ApiError> {
    let reply = state.dispatcher.report(id, &message).await?;
    Ok(Json(reply))
}

async fn snapshot(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> Result<Json<JobSnapshot>, ApiError> {
    Ok(Json(state.dispatcher.snapshot(id).await?))
}

async fn worker_status(
    State(state): State<AppState>,
    Json(status): Json<WorkerStatus>,
) -> Result<StatusCode, ApiError> {
    state.dispatcher.record_worker_status(&status).await?;
    Ok(StatusCode::NO_CONTENT)
}
