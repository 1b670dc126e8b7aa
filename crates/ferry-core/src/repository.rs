//! Repositories and the users whose credentials drive code-host access.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, ResourceId, Result};

/// Branch used when the code host does not report a default branch.
pub const FALLBACK_MAIN_BRANCH: &str = "heads/master";

/// Split an `owner/repo` name into its two parts, validating each.
///
/// Both parts must be non-empty, must not start or end with `.`, and must not
/// contain `<`, `>`, `&` or `%`.
pub fn owner_repo(name: &str) -> Result<(&str, &str)> {
    let mut parts = name.split('/');
    let (Some(owner), Some(repo), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(Error::invalid(format!(
            "repository name {name:?}: invalid number of parts"
        )));
    };

    for part in [owner, repo] {
        if part.is_empty() {
            return Err(Error::invalid(format!(
                "repository name {name:?}: empty part"
            )));
        }
        if part.starts_with('.')
            || part.ends_with('.')
            || part.contains(['<', '>', '&', '%'])
        {
            return Err(Error::invalid(format!(
                "repository name {name:?} contains invalid characters"
            )));
        }
    }

    Ok((owner, repo))
}

pub fn is_owner_repo(name: &str) -> bool {
    owner_repo(name).is_ok()
}

/// A user known to ferry. The token is the code-host credential used to act on
/// behalf of the user; it is never serialized out of the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: ResourceId,
    pub username: String,
    #[serde(skip_serializing, default)]
    pub token: String,
    pub created_at: DateTime<Utc>,
}

/// A repository registered with ferry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: ResourceId,
    /// `owner/repo`.
    pub name: String,
    pub private: bool,
    pub disabled: bool,
    /// Default branch as reported by the code host, without any `heads/` prefix.
    pub default_branch: Option<String>,
    /// Opaque host-specific metadata.
    pub metadata: serde_json::Value,
    /// User whose credentials are used for this repository.
    pub owner_id: Option<ResourceId>,
    /// Webhook secret; present only while the repository is enabled.
    #[serde(skip_serializing, default)]
    pub hook_secret: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Repository {
    pub fn validate(&self) -> Result<()> {
        owner_repo(&self.name)?;
        if self.disabled && self.hook_secret.is_some() {
            return Err(Error::invalid(format!(
                "repository {} is disabled but still carries a hook secret",
                self.name
            )));
        }
        Ok(())
    }

    /// The main branch in `heads/<branch>` form.
    pub fn main_branch(&self) -> String {
        main_branch_ref(self.default_branch.as_deref())
    }
}

/// Turn a host-reported default branch into the `heads/<branch>` ref form.
pub fn main_branch_ref(default_branch: Option<&str>) -> String {
    match default_branch {
        Some(branch) if !branch.is_empty() => format!("heads/{branch}"),
        _ => FALLBACK_MAIN_BRANCH.to_string(),
    }
}

/// Fields required to register a repository.
#[derive(Debug, Clone)]
pub struct NewRepository {
    pub name: String,
    pub private: bool,
    pub disabled: bool,
    pub default_branch: Option<String>,
    pub metadata: serde_json::Value,
    pub owner_id: Option<ResourceId>,
    pub hook_secret: Option<String>,
}
