//! The queue surface polled by workers.

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use ferry_core::pagination::Page;
use ferry_core::queue::QueueItem;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_queue))
        .route("/count", get(count_queue))
        .route("/next", post(next_item))
}

#[derive(Debug, Deserialize)]
pub struct NextRequest {
    #[serde(default)]
    pub queue_name: String,
    pub running_on: String,
}

/// Claim the next item. `404` means the queue is empty.
async fn next_item(
    State(state): State<AppState>,
    Json(req): Json<NextRequest>,
) -> Result<Json<QueueItem>, ApiError> {
    let item = state
        .scheduler
        .next(&req.queue_name, &req.running_on)
        .await?;
    Ok(Json(item))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub repository: Option<String>,
}

async fn list_queue(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<QueueItem>>, ApiError> {
    let page = Page::scoped(query.page, query.per_page)?;
    let items = state
        .scheduler
        .list_queue(page, query.repository.as_deref())
        .await?;
    Ok(Json(items))
}

#[derive(Debug, Deserialize)]
pub struct CountQuery {
    pub repository: Option<String>,
}

async fn count_queue(
    State(state): State<AppState>,
    Query(query): Query<CountQuery>,
) -> Result<Json<Value>, ApiError> {
    let count = state
        .scheduler
        .count_queue(query.repository.as_deref())
        .await?;
    Ok(Json(json!({ "count": count })))
}
