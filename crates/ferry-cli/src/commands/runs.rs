//! Run commands.

use super::{ApiClient, print_json};
use anyhow::Result;
use serde_json::Value;

pub async fn cancel(api: &ApiClient, run_id: &str) -> Result<()> {
    let result: Value = api
        .post(&format!("api/v1/runs/{run_id}/cancel"), &Value::Null)
        .await?;
    print_json(&result)
}
