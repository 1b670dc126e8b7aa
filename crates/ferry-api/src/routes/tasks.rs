//! Task lookup and cancellation.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use ferry_core::ResourceId;
use ferry_core::run::Run;
use ferry_core::task::Task;

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{id}", get(get_task))
        .route("/{id}/cancel", post(cancel_task))
}

async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<ResourceId>,
) -> Result<Json<Task>, ApiError> {
    Ok(Json(state.scheduler.get_task(id).await?))
}

/// Cancel a task, returning the runs that were still open.
async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<ResourceId>,
) -> Result<Json<Vec<Run>>, ApiError> {
    Ok(Json(state.scheduler.cancel_task(id).await?))
}
