//! SHAs, branch names and refs.

use serde::{Deserialize, Serialize};

use crate::{Error, ResourceId, Result};

/// The SHA the code host reports for "no commit" (new branch, deleted branch).
pub const ZERO_SHA: &str = "0000000000000000000000000000000000000000";

/// Whether the string looks like a full SHA-1 hex digest.
pub fn is_sha(sha: &str) -> bool {
    let sha = sha.trim();
    sha.len() == 40 && sha.chars().all(|c| c.is_ascii_hexdigit())
}

/// Normalize a branch name to the `heads/<branch>` form used for ref names.
pub fn qualify_branch(branch: &str) -> Result<String> {
    if is_sha(branch) {
        return Err(Error::invalid(format!("{branch:?} is a sha, not a branch")));
    }
    if branch.starts_with('/') {
        return Err(Error::invalid(format!("invalid branch name {branch:?}")));
    }

    let branch = branch.trim();
    let branch = branch.strip_prefix("refs/heads/").unwrap_or(branch);

    let parts: Vec<&str> = branch
        .split('/')
        .map(str::trim)
        .filter(|p| !p.is_empty() && *p != "." && *p != "..")
        .collect();

    match parts.as_slice() {
        [] => Err(Error::invalid(format!("invalid branch name {branch:?}"))),
        ["heads"] => Err(Error::invalid(format!("invalid branch name {branch:?}"))),
        ["heads", ..] => Ok(parts.join("/")),
        _ => Ok(format!("heads/{}", parts.join("/"))),
    }
}

/// A named pointer into a repository's history. Refs are append-only and
/// looked up by `(repository, sha)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ref {
    pub id: ResourceId,
    pub repository_id: ResourceId,
    /// Branch or tag (`heads/main`, `tags/v1`), or the bare SHA.
    pub ref_name: String,
    pub sha: String,
}

/// Fields required to create a ref.
#[derive(Debug, Clone)]
pub struct NewRef {
    pub repository_id: ResourceId,
    pub ref_name: String,
    pub sha: String,
}

impl NewRef {
    pub fn validate(&self) -> Result<()> {
        validate_ref_fields(&self.ref_name, &self.sha)
    }
}

impl Ref {
    pub fn validate(&self) -> Result<()> {
        validate_ref_fields(&self.ref_name, &self.sha)
    }
}

fn validate_ref_fields(ref_name: &str, sha: &str) -> Result<()> {
    if ref_name.is_empty() {
        return Err(Error::invalid("empty ref name"));
    }
    if sha.is_empty() {
        return Err(Error::invalid("empty SHA"));
    }
    if sha.len() != 40 || !is_sha(sha) {
        return Err(Error::invalid(format!("invalid SHA {sha:?}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_sha() {
        assert!(is_sha("be3d26c478991039e951097f2c99f56b55396941"));
        assert!(is_sha(ZERO_SHA));
        assert!(!is_sha("be3d26c478991039e951097f2c99f56b5539694"));
        assert!(!is_sha("zz3d26c478991039e951097f2c99f56b55396941"));
        assert!(!is_sha("main"));
    }

    #[test]
    fn test_qualify_branch() {
        assert_eq!(qualify_branch("main").unwrap(), "heads/main");
        assert_eq!(qualify_branch("refs/heads/feature/x").unwrap(), "heads/feature/x");
        assert_eq!(qualify_branch("heads/main").unwrap(), "heads/main");
        assert_eq!(qualify_branch("./../main").unwrap(), "heads/main");
        assert!(qualify_branch("heads").is_err());
        assert!(qualify_branch("/main").is_err());
        assert!(qualify_branch("..").is_err());
        assert!(qualify_branch("be3d26c478991039e951097f2c99f56b55396941").is_err());
    }

    #[test]
    fn test_ref_validation() {
        let repository_id = ResourceId::new();
        let ok = NewRef {
            repository_id,
            ref_name: "heads/main".into(),
            sha: "be3d26c478991039e951097f2c99f56b55396941".into(),
        };
        assert!(ok.validate().is_ok());

        let short = NewRef { sha: "abc".into(), ..ok.clone() };
        assert!(short.validate().is_err());

        let unnamed = NewRef { ref_name: String::new(), ..ok };
        assert!(unnamed.validate().is_err());
    }
}
