//! Submissions: the incoming change event and its persisted record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::git::{is_sha, qualify_branch, Ref};
use crate::repository::is_owner_repo;
use crate::{Error, ResourceId, Result};

/// A request to test a change, as delivered by the webhook collaborator or a
/// user asking for a manual run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRequest {
    /// Repository the change is proposed against (`owner/repo`). Derived from
    /// the fork for manual submissions.
    #[serde(default)]
    pub parent: String,
    /// Repository holding the change (`owner/repo`).
    pub fork: String,
    /// Head SHA or branch name.
    pub head: String,
    /// Base SHA or branch name. Optional for manual submissions.
    #[serde(default)]
    pub base: String,
    #[serde(default)]
    pub pull_request_id: Option<i64>,
    #[serde(default)]
    pub submitted_by: Option<String>,
    /// Run every task regardless of the diff. Only valid for manual submissions.
    #[serde(default)]
    pub all: bool,
    #[serde(default)]
    pub manual: bool,
}

impl SubmissionRequest {
    /// Check the structural invariants and qualify branch-like head/base values
    /// into `heads/<branch>` form.
    pub fn validated(mut self) -> Result<Self> {
        if !self.manual && !is_owner_repo(&self.parent) {
            return Err(Error::invalid(format!("parent {:?} is invalid", self.parent)));
        }

        if self.all && !self.manual {
            return Err(Error::invalid("hook-triggered submissions may not force all"));
        }

        if !is_owner_repo(&self.fork) {
            return Err(Error::invalid(format!("fork {:?} is invalid", self.fork)));
        }

        if self.head.trim().is_empty() {
            return Err(Error::invalid("head is empty"));
        }

        if !is_sha(&self.head) {
            self.head = qualify_branch(&self.head)?;
        }

        if self.base.trim().is_empty() {
            if !self.manual {
                return Err(Error::invalid("base is empty"));
            }
        } else if !is_sha(&self.base) {
            self.base = qualify_branch(&self.base)?;
        }

        Ok(self)
    }
}

/// One processed change event, tying a base and (optionally) a head ref.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: ResourceId,
    pub base_ref: Ref,
    /// Absent when the head is the base.
    pub head_ref: Option<Ref>,
    pub submitted_by: Option<ResourceId>,
    pub ticket_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    /// Computed at read time.
    pub tasks_count: i64,
    /// Computed at read time.
    pub runs_count: i64,
}

impl Submission {
    /// The ref under test: the head if present, the base otherwise.
    pub fn tested_ref(&self) -> &Ref {
        self.head_ref.as_ref().unwrap_or(&self.base_ref)
    }
}

/// Fields required to record a submission.
#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub base_ref_id: ResourceId,
    pub head_ref_id: Option<ResourceId>,
    pub submitted_by: Option<ResourceId>,
    pub ticket_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHA: &str = "be3d26c478991039e951097f2c99f56b55396941";

    fn hook() -> SubmissionRequest {
        SubmissionRequest {
            parent: "erikh/foo".into(),
            fork: "other/foo".into(),
            head: SHA.into(),
            base: SHA.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_hook_submission_valid() {
        let sub = hook().validated().unwrap();
        assert_eq!(sub.head, SHA);
    }

    #[test]
    fn test_hook_submission_requires_parent_and_base() {
        assert!(SubmissionRequest { parent: "bad".into(), ..hook() }.validated().is_err());
        assert!(SubmissionRequest { base: String::new(), ..hook() }.validated().is_err());
        assert!(SubmissionRequest { fork: "nope".into(), ..hook() }.validated().is_err());
        assert!(SubmissionRequest { head: " ".into(), ..hook() }.validated().is_err());
    }

    #[test]
    fn test_all_requires_manual() {
        assert!(SubmissionRequest { all: true, ..hook() }.validated().is_err());

        let manual = SubmissionRequest {
            parent: String::new(),
            base: String::new(),
            all: true,
            manual: true,
            submitted_by: Some("erikh".into()),
            ..hook()
        };
        assert!(manual.validated().is_ok());
    }

    #[test]
    fn test_branches_are_qualified() {
        let sub = SubmissionRequest {
            head: "feature/thing".into(),
            base: "refs/heads/main".into(),
            ..hook()
        }
        .validated()
        .unwrap();
        assert_eq!(sub.head, "heads/feature/thing");
        assert_eq!(sub.base, "heads/main");
    }
}
