//! Run results and cancellation, as reported and polled by workers.

use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use ferry_core::ResourceId;
use ferry_core::run::Run;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{id}/status", post(set_status))
        .route("/{id}/cancel", post(set_cancel).get(get_cancel))
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: bool,
    #[serde(default)]
    pub message: String,
}

async fn set_status(
    State(state): State<AppState>,
    Path(id): Path<ResourceId>,
    Json(req): Json<StatusRequest>,
) -> Result<Json<Run>, ApiError> {
    let run = state
        .scheduler
        .set_status(id, req.status, &req.message)
        .await?;
    Ok(Json(run))
}

async fn set_cancel(
    State(state): State<AppState>,
    Path(id): Path<ResourceId>,
) -> Result<Json<Value>, ApiError> {
    state.scheduler.set_cancel(id).await?;
    Ok(Json(json!({ "canceled": true })))
}

async fn get_cancel(
    State(state): State<AppState>,
    Path(id): Path<ResourceId>,
) -> Result<Json<Value>, ApiError> {
    let canceled = state.scheduler.get_cancel(id).await?;
    Ok(Json(json!({ "canceled": canceled })))
}
