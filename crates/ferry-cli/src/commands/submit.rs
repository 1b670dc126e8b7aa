//! Manual submissions.

use super::{ApiClient, print_json};
use anyhow::Result;
use serde_json::json;

pub async fn submit(
    api: &ApiClient,
    fork: String,
    head: String,
    base: Option<String>,
    all: bool,
    user: String,
) -> Result<()> {
    let body = json!({
        "fork": fork,
        "head": head,
        "base": base.unwrap_or_default(),
        "submitted_by": user,
        "all": all,
        "manual": true,
    });

    let submitted: serde_json::Value = api.post("api/v1/submissions", &body).await?;
    print_json(&submitted)
}
