//! Pull request lifecycle events.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use ferry_scheduler::{Intake, IntakeOutcome};
use serde::Deserialize;

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new().route("/cancel", post(cancel_pull_request))
}

#[derive(Debug, Deserialize)]
pub struct CancelPullRequest {
    pub repository: String,
    pub pull_request_id: i64,
}

/// A closed or superseded pull request: cancel its open work, dispatch nothing.
async fn cancel_pull_request(
    State(state): State<AppState>,
    Json(req): Json<CancelPullRequest>,
) -> Result<Json<IntakeOutcome>, ApiError> {
    let outcome = state
        .scheduler
        .intake(Intake::CancelPullRequest {
            repository: req.repository,
            pull_request_id: req.pull_request_id,
        })
        .await?;
    Ok(Json(outcome))
}
