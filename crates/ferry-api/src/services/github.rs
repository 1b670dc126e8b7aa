//! GitHub REST implementation of the code-host client.

use async_trait::async_trait;
use ferry_core::codehost::{
    CodeHost, CodeHostError, CodeHostFactory, CodeHostResult, CommitStatus, HostRepository,
};
use ferry_core::git::ZERO_SHA;
use reqwest::{Method, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

const USER_AGENT: &str = "ferry-ci";

/// Whole-request timeout used when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Every request is bounded so a hung call cannot stall status delivery.
fn http_client(timeout: Duration) -> CodeHostResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(CONNECT_TIMEOUT.min(timeout))
        .build()
        .map_err(|e| CodeHostError::Request(format!("failed to create HTTP client: {e}")))
}

/// Builds [`GitHubClient`]s sharing one connection pool.
#[derive(Clone)]
pub struct GitHubHosts {
    http: reqwest::Client,
    api: Url,
}

impl GitHubHosts {
    pub fn new(api: Url, timeout: Duration) -> CodeHostResult<Self> {
        Ok(Self {
            http: http_client(timeout)?,
            api: with_trailing_slash(api),
        })
    }
}

impl CodeHostFactory for GitHubHosts {
    fn for_token(&self, token: &str) -> Arc<dyn CodeHost> {
        Arc::new(GitHubClient {
            http: self.http.clone(),
            api: self.api.clone(),
            token: token.to_string(),
        })
    }
}

/// GitHub API client bound to one access token.
pub struct GitHubClient {
    http: reqwest::Client,
    api: Url,
    token: String,
}

impl GitHubClient {
    pub fn new(api: Url, token: impl Into<String>) -> CodeHostResult<Self> {
        Ok(Self {
            http: http_client(DEFAULT_TIMEOUT)?,
            api: with_trailing_slash(api),
            token: token.into(),
        })
    }

    fn url(&self, path: &str) -> CodeHostResult<Url> {
        self.api
            .join(path)
            .map_err(|e| CodeHostError::Invalid(format!("{path}: {e}")))
    }

    fn request(&self, method: Method, path: &str) -> CodeHostResult<RequestBuilder> {
        self.request_accepting(method, path, "application/vnd.github+json")
    }

    fn request_accepting(
        &self,
        method: Method,
        path: &str,
        accept: &str,
    ) -> CodeHostResult<RequestBuilder> {
        Ok(self
            .http
            .request(method, self.url(path)?)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("User-Agent", USER_AGENT)
            .header("Accept", accept))
    }

    async fn send(&self, request: RequestBuilder) -> CodeHostResult<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| CodeHostError::Request(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(CodeHostError::NotFound(message));
        }
        Err(CodeHostError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> CodeHostResult<T> {
        let response = self.send(self.request(Method::GET, path)?).await?;
        response
            .json()
            .await
            .map_err(|e| CodeHostError::Parse(e.to_string()))
    }
}

fn with_trailing_slash(mut api: Url) -> Url {
    if !api.path().ends_with('/') {
        let path = format!("{}/", api.path());
        api.set_path(&path);
    }
    api
}

/// Percent-encode each segment of a repository path.
fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[derive(Debug, Deserialize)]
struct RepoPayload {
    full_name: String,
    #[serde(default)]
    private: bool,
    #[serde(default)]
    fork: bool,
    parent: Option<ParentPayload>,
    default_branch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ParentPayload {
    full_name: String,
}

impl RepoPayload {
    fn into_host(self, metadata: serde_json::Value) -> HostRepository {
        HostRepository {
            full_name: self.full_name,
            private: self.private,
            fork: self.fork,
            parent: self.parent.map(|p| p.full_name),
            default_branch: self.default_branch,
            metadata,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RefPayload {
    object: ObjectPayload,
}

#[derive(Debug, Deserialize)]
struct ObjectPayload {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct BranchPayload {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TreePayload {
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct ComparePayload {
    #[serde(default)]
    files: Vec<CompareFile>,
}

#[derive(Debug, Deserialize)]
struct CompareFile {
    filename: String,
}

#[derive(Debug, Deserialize)]
struct StatusPayload {
    context: String,
    #[serde(default)]
    target_url: Option<String>,
}

#[async_trait]
impl CodeHost for GitHubClient {
    async fn get_repository(&self, name: &str) -> CodeHostResult<HostRepository> {
        let metadata: serde_json::Value = self.get_json(&format!("repos/{name}")).await?;
        let payload: RepoPayload = serde_json::from_value(metadata.clone())
            .map_err(|e| CodeHostError::Parse(e.to_string()))?;
        Ok(payload.into_host(metadata))
    }

    async fn get_sha(&self, repo: &str, ref_name: &str) -> CodeHostResult<String> {
        let payload: RefPayload = self
            .get_json(&format!("repos/{repo}/git/ref/{}", encode_path(ref_name)))
            .await?;
        Ok(payload.object.sha)
    }

    /// Only branches are reported; GitHub has no reverse lookup for tags.
    async fn get_refs(&self, repo: &str, sha: &str) -> CodeHostResult<Vec<String>> {
        let branches: Vec<BranchPayload> = self
            .get_json(&format!("repos/{repo}/commits/{sha}/branches-where-head"))
            .await?;
        Ok(branches
            .into_iter()
            .map(|b| format!("heads/{}", b.name))
            .collect())
    }

    async fn get_file_list(&self, repo: &str, sha: &str) -> CodeHostResult<Vec<String>> {
        let request = self
            .request(Method::GET, &format!("repos/{repo}/git/trees/{sha}"))?
            .query(&[("recursive", "1")]);
        let payload: TreePayload = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(|e| CodeHostError::Parse(e.to_string()))?;

        if payload.truncated {
            return Err(CodeHostError::Invalid(format!(
                "tree for {repo}@{sha} is too large to list"
            )));
        }

        Ok(payload
            .tree
            .into_iter()
            .filter(|e| e.kind == "blob")
            .map(|e| e.path)
            .collect())
    }

    async fn get_file(&self, repo: &str, sha: &str, path: &str) -> CodeHostResult<Vec<u8>> {
        let request = self
            .request_accepting(
                Method::GET,
                &format!("repos/{repo}/contents/{}", encode_path(path)),
                "application/vnd.github.raw",
            )?
            .query(&[("ref", sha)]);

        let bytes = self
            .send(request)
            .await?
            .bytes()
            .await
            .map_err(|e| CodeHostError::Request(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn get_diff_files(
        &self,
        repo: &str,
        base: &str,
        head: &str,
    ) -> CodeHostResult<Vec<String>> {
        if base == ZERO_SHA {
            return self.get_file_list(repo, head).await;
        }

        let payload: ComparePayload = self
            .get_json(&format!("repos/{repo}/compare/{base}...{head}"))
            .await?;
        Ok(payload.files.into_iter().map(|f| f.filename).collect())
    }

    async fn post_status(
        &self,
        repo: &str,
        sha: &str,
        status: &CommitStatus,
    ) -> CodeHostResult<()> {
        let request = self
            .request(Method::POST, &format!("repos/{repo}/statuses/{sha}"))?
            .json(&serde_json::json!({
                "state": status.state.as_str(),
                "target_url": status.target_url,
                "description": status.description,
                "context": status.context,
            }));
        self.send(request).await?;
        Ok(())
    }

    async fn clear_states(&self, repo: &str, sha: &str) -> CodeHostResult<()> {
        let statuses: Vec<StatusPayload> = self
            .get_json(&format!("repos/{repo}/commits/{sha}/statuses"))
            .await?;

        // newest first; one replacement per context
        let mut seen = HashSet::new();
        for status in statuses {
            if !seen.insert(status.context.clone()) {
                continue;
            }
            let cleared = CommitStatus::cleared(
                &status.context,
                status.target_url.as_deref().unwrap_or_default(),
            );
            self.post_status(repo, sha, &cleared).await?;
        }

        debug!(repo, sha, cleared = seen.len(), "cleared commit statuses");
        Ok(())
    }

    async fn comment_error(
        &self,
        repo: &str,
        pull_request_id: i64,
        text: &str,
    ) -> CodeHostResult<()> {
        let request = self
            .request(
                Method::POST,
                &format!("repos/{repo}/issues/{pull_request_id}/comments"),
            )?
            .json(&serde_json::json!({ "body": text }));
        self.send(request).await?;
        Ok(())
    }
}
