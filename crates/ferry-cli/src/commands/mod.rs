//! CLI command implementations.

pub mod queue;
pub mod runs;
pub mod submit;

use anyhow::{Context, Result, bail};
use ferry_config::{RepoConfig, parse_repo_config, parse_task};
use ferry_core::run::run_name;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use tracing::debug;
use url::Url;

/// Thin JSON client for the ferry API.
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
}

impl ApiClient {
    pub fn new(base: Url) -> Self {
        Self {
            http: reqwest::Client::new(),
            base,
        }
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .with_context(|| format!("invalid API path {path}"))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = self.url(path)?;
        debug!(%url, "GET");
        let response = self.http.get(url).query(query).send().await?;
        decode(response).await
    }

    pub async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.url(path)?;
        debug!(%url, "POST");
        let response = self.http.post(url).json(body).send().await?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body: serde_json::Value = response.json().await.unwrap_or_default();
        match body.get("error").and_then(|e| e.as_str()) {
            Some(message) => bail!("{status}: {message}"),
            None => bail!("{status}"),
        }
    }
    Ok(response.json().await?)
}

pub fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Parse a task declaration the way the scheduler would and print its runs.
pub fn validate(path: &str, repo_config: Option<&str>) -> Result<()> {
    let config = match repo_config {
        Some(file) => {
            let content =
                std::fs::read_to_string(file).with_context(|| format!("reading {file}"))?;
            parse_repo_config(&content).with_context(|| format!("parsing {file}"))?
        }
        None => RepoConfig::default(),
    };

    let content = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    let settings = parse_task(&content, &config).with_context(|| format!("parsing {path}"))?;

    let dir = Path::new(path)
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();

    println!("Configuration is valid");
    for dep in &settings.dependencies {
        println!("  depends on {dep}");
    }
    for (name, run) in &settings.runs {
        println!(
            "  {}: image={} queue={} timeout={}s",
            run_name(&dir, name),
            run.image,
            run.queue,
            run.timeout_secs
        );
    }
    Ok(())
}
