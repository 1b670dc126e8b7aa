//! Submission intake and lookup.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use ferry_core::ResourceId;
use ferry_core::submission::{Submission, SubmissionRequest};
use ferry_scheduler::Submitted;
use serde_json::{Value, json};

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_submission))
        .route("/{id}", get(get_submission))
        .route("/{id}/cancel", post(cancel_submission))
}

/// Process a change event and enqueue its runs.
async fn create_submission(
    State(state): State<AppState>,
    Json(request): Json<SubmissionRequest>,
) -> Result<(StatusCode, Json<Submitted>), ApiError> {
    let submitted = state.scheduler.submit(request).await?;
    Ok((StatusCode::CREATED, Json(submitted)))
}

async fn get_submission(
    State(state): State<AppState>,
    Path(id): Path<ResourceId>,
) -> Result<Json<Submission>, ApiError> {
    Ok(Json(state.scheduler.get_submission(id).await?))
}

async fn cancel_submission(
    State(state): State<AppState>,
    Path(id): Path<ResourceId>,
) -> Result<Json<Value>, ApiError> {
    let canceled = state.scheduler.cancel_submission(id).await?;
    Ok(Json(json!({ "canceled": canceled })))
}
