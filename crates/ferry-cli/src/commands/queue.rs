//! Queue inspection.

use super::{ApiClient, print_json};
use anyhow::Result;
use serde_json::Value;

pub async fn list(
    api: &ApiClient,
    repository: Option<String>,
    page: i64,
    per_page: i64,
) -> Result<()> {
    let mut query = vec![("page", page.to_string()), ("per_page", per_page.to_string())];
    if let Some(repository) = repository {
        query.push(("repository", repository));
    }

    let items: Value = api.get("api/v1/queue", &query).await?;
    print_json(&items)
}

pub async fn count(api: &ApiClient, repository: Option<String>) -> Result<()> {
    let query: Vec<(&str, String)> = repository
        .into_iter()
        .map(|r| ("repository", r))
        .collect();

    let count: Value = api.get("api/v1/queue/count", &query).await?;
    print_json(&count)
}
