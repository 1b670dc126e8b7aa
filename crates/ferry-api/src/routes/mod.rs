//! API routes.

pub mod health;
pub mod pull_requests;
pub mod queue;
pub mod runs;
pub mod submissions;
pub mod tasks;

use crate::AppState;
use axum::Router;

/// Build the main API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_router())
        .merge(health::router())
        .with_state(state)
}

fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/submissions", submissions::router())
        .nest("/pull-requests", pull_requests::router())
        .nest("/queue", queue::router())
        .nest("/runs", runs::router())
        .nest("/tasks", tasks::router())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::GitHubHosts;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use ferry_core::ResourceId;
    use ferry_db::Repos;
    use ferry_scheduler::{Scheduler, StatusReporter};
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app() -> Router {
        // nothing in these tests reaches the code host
        let hosts = GitHubHosts::new("http://127.0.0.1:9".parse().unwrap(), Duration::from_secs(1));
        let hosts = Arc::new(hosts.unwrap());
        let (reporter, _worker) = StatusReporter::channel(8, "http://ferry.test");
        let scheduler = Scheduler::new(Repos::in_memory(), hosts, reporter);
        router(AppState::new(scheduler))
    }

    async fn call(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        // extractor rejections answer in plain text
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = call(app(), Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_empty_queue_is_not_found() {
        let (status, body) = call(
            app(),
            post_json("/api/v1/queue/next", json!({ "running_on": "worker-1" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());

        let (status, _) = call(
            app(),
            post_json("/api/v1/queue/next", json!({ "running_on": "" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_queue_count_and_paging() {
        let (status, body) =
            call(app(), Request::get("/api/v1/queue/count").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 0);

        let (status, body) = call(
            app(),
            Request::get("/api/v1/queue?page=0&per_page=500")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));

        let (status, _) = call(
            app(),
            Request::get("/api/v1/queue?page=-1").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_records() {
        let id = ResourceId::new();

        let (status, _) = call(
            app(),
            post_json(
                &format!("/api/v1/runs/{id}/status"),
                json!({ "status": true, "message": "ok" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(
            app(),
            Request::get(format!("/api/v1/tasks/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(
            app(),
            Request::get("/api/v1/runs/not-a-uuid/cancel")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_submission_errors() {
        let (status, body) = call(
            app(),
            post_json(
                "/api/v1/submissions",
                json!({
                    "parent": "erikh/foo",
                    "fork": "erikh/foo",
                    "head": "be3d26c478991039e951097f2c99f56b55396941",
                    "base": "",
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("base is empty"));

        let (status, body) = call(
            app(),
            post_json(
                "/api/v1/submissions",
                json!({
                    "parent": "erikh/foo",
                    "fork": "erikh/foo",
                    "head": "be3d26c478991039e951097f2c99f56b55396941",
                    "base": "heads/main",
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(
            body["error"]
                .as_str()
                .unwrap()
                .contains("obtaining parent repository")
        );
    }

    #[tokio::test]
    async fn test_cancel_pull_request_without_work() {
        let (status, body) = call(
            app(),
            post_json(
                "/api/v1/pull-requests/cancel",
                json!({ "repository": "erikh/foo", "pull_request_id": 7 }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "type": "canceled", "tasks": 0 }));
    }
}
