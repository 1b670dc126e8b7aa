//! The code-host capability set consumed by the scheduler.
//!
//! Every client is bound to one credential at construction time. Callers get
//! clients from a [`CodeHostFactory`] and pass them explicitly; there is no
//! process-wide default client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Hosts truncate status descriptions longer than this.
pub const MAX_STATUS_DESCRIPTION: usize = 140;

const CLEARED_DESCRIPTION: &str = "The run that this test was a part of has been overridden by a new run. Pushing a new change will remove this error.";

#[derive(Debug, Error)]
pub enum CodeHostError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("code host returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("failed to parse response: {0}")]
    Parse(String),
}

impl CodeHostError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CodeHostError::NotFound(_))
            || matches!(self, CodeHostError::Api { status: 404, .. })
    }
}

pub type CodeHostResult<T> = std::result::Result<T, CodeHostError>;

/// A repository as the code host describes it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostRepository {
    pub full_name: String,
    pub private: bool,
    pub fork: bool,
    /// `owner/repo` of the upstream when this repository is a fork.
    pub parent: Option<String>,
    pub default_branch: Option<String>,
    /// The raw host payload, stored as repository metadata.
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusState {
    Pending,
    Success,
    Failure,
    Error,
}

impl StatusState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusState::Pending => "pending",
            StatusState::Success => "success",
            StatusState::Failure => "failure",
            StatusState::Error => "error",
        }
    }
}

/// A commit status keyed by `context` (the run name).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitStatus {
    pub context: String,
    pub state: StatusState,
    pub target_url: String,
    pub description: String,
}

impl CommitStatus {
    fn new(context: &str, state: StatusState, target_url: &str, description: String) -> Self {
        Self {
            context: context.to_string(),
            state,
            target_url: target_url.to_string(),
            description: cap_description(description),
        }
    }

    pub fn pending(context: &str, target_url: &str) -> Self {
        Self::new(
            context,
            StatusState::Pending,
            target_url,
            "The run will be starting soon.".into(),
        )
    }

    pub fn started(context: &str, target_url: &str) -> Self {
        Self::new(
            context,
            StatusState::Pending,
            target_url,
            "The run has started!".into(),
        )
    }

    pub fn error(context: &str, target_url: &str, message: &str) -> Self {
        Self::new(
            context,
            StatusState::Error,
            target_url,
            format!("The run encountered an error: {message}"),
        )
    }

    pub fn finished(context: &str, target_url: &str, success: bool, message: &str) -> Self {
        let state = if success {
            StatusState::Success
        } else {
            StatusState::Failure
        };
        Self::new(
            context,
            state,
            target_url,
            format!("The run finished: {}! {message}", state.as_str()),
        )
    }

    /// The replacement posted over a stale status when a newer run supersedes it.
    /// The context is preserved so the host overwrites the old entry.
    pub fn cleared(context: &str, target_url: &str) -> Self {
        Self::new(
            context,
            StatusState::Error,
            target_url,
            CLEARED_DESCRIPTION.into(),
        )
    }
}

/// Truncate on a char boundary at [`MAX_STATUS_DESCRIPTION`] characters.
pub fn cap_description(description: String) -> String {
    match description.char_indices().nth(MAX_STATUS_DESCRIPTION) {
        Some((idx, _)) => description[..idx].to_string(),
        None => description,
    }
}

/// Operations against a code-hosting service, bound to one owner credential.
#[async_trait]
pub trait CodeHost: Send + Sync {
    async fn get_repository(&self, name: &str) -> CodeHostResult<HostRepository>;

    /// Resolve a ref (`heads/main`, `tags/v1`) to a SHA.
    async fn get_sha(&self, repo: &str, ref_name: &str) -> CodeHostResult<String>;

    /// Heads and tags pointing at `sha`, without the `refs/` prefix.
    async fn get_refs(&self, repo: &str, sha: &str) -> CodeHostResult<Vec<String>>;

    async fn get_file_list(&self, repo: &str, sha: &str) -> CodeHostResult<Vec<String>>;

    async fn get_file(&self, repo: &str, sha: &str, path: &str) -> CodeHostResult<Vec<u8>>;

    /// Files changed between `base` and `head`. Implementations return the
    /// full file list of `head` when `base` is the zero SHA.
    async fn get_diff_files(&self, repo: &str, base: &str, head: &str)
    -> CodeHostResult<Vec<String>>;

    async fn post_status(&self, repo: &str, sha: &str, status: &CommitStatus)
    -> CodeHostResult<()>;

    /// Overwrite every existing status at `sha` with an "overridden" error.
    async fn clear_states(&self, repo: &str, sha: &str) -> CodeHostResult<()>;

    async fn comment_error(&self, repo: &str, pull_request_id: i64, text: &str)
    -> CodeHostResult<()>;
}

/// Builds code-host clients bound to a stored credential.
pub trait CodeHostFactory: Send + Sync {
    fn for_token(&self, token: &str) -> Arc<dyn CodeHost>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_description_cap() {
        let long = "x".repeat(300);
        let status = CommitStatus::error("*root*:test", "http://ferry", &long);
        assert_eq!(status.description.chars().count(), MAX_STATUS_DESCRIPTION);
        assert_eq!(status.state, StatusState::Error);

        let short = CommitStatus::finished("*root*:test", "http://ferry", true, "ok");
        assert_eq!(short.description, "The run finished: success! ok");
    }

    #[test]
    fn test_cap_multibyte() {
        let s = "é".repeat(200);
        assert_eq!(cap_description(s).chars().count(), MAX_STATUS_DESCRIPTION);
    }
}
