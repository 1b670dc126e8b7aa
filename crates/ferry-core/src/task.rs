//! Tasks and their declared settings.
//!
//! A task corresponds to one source directory containing a task declaration.
//! Its settings are parsed by `ferry-config`; the types and the post-parse
//! validation rules live here so stored records can be re-checked on read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{Error, ResourceId, Result};

/// Resources a runner should make available. Units are interpreted by the
/// runner; ferry does not normalize them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    pub cpu: u32,
    pub memory: u32,
    pub disk: u32,
    pub iops: u32,
}

impl Resources {
    pub fn is_unset(&self) -> bool {
        *self == Resources::default()
    }
}

/// Settings of one run within a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSettings {
    pub name: String,
    pub command: Vec<String>,
    pub image: String,
    pub queue: String,
    /// Seconds; 0 means no timeout. Enforced by the runner, not by ferry.
    pub timeout_secs: u64,
    pub resources: Resources,
    pub metadata: BTreeMap<String, String>,
    pub privileged: bool,
}

impl RunSettings {
    pub fn validate(&self) -> Result<()> {
        if self.command.is_empty() {
            return Err(Error::invalid(format!("run {:?}: command was empty", self.name)));
        }
        if self.image.is_empty() {
            return Err(Error::invalid(format!("run {:?}: image was empty", self.name)));
        }
        if self.queue.is_empty() {
            return Err(Error::invalid(format!("run {:?}: queue name was empty", self.name)));
        }
        Ok(())
    }
}

/// Everything a task declaration configures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSettings {
    pub mountpoint: String,
    pub workdir: String,
    pub env: Vec<String>,
    /// Directories (relative to the repository root) whose tasks must also run.
    pub dependencies: Vec<String>,
    pub runs: BTreeMap<String, RunSettings>,
    pub default_timeout_secs: u64,
    pub default_queue: String,
    pub default_image: String,
    pub default_resources: Resources,
    pub metadata: BTreeMap<String, String>,
}

impl TaskSettings {
    /// Validate settings after defaults have been applied.
    pub fn validate(&self) -> Result<()> {
        if self.runs.is_empty() {
            if self.dependencies.is_empty() {
                return Err(Error::invalid("no runs in task and no dependencies"));
            }
            return Ok(());
        }

        if self.mountpoint.is_empty() {
            return Err(Error::invalid("no mountpoint"));
        }

        for run in self.runs.values() {
            run.validate()?;
        }

        Ok(())
    }
}

/// A unit of work for one directory of one submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: ResourceId,
    pub submission_id: ResourceId,
    /// The parent repository the submission was made against.
    pub repository_id: ResourceId,
    pub path: String,
    pub settings: TaskSettings,
    pub pull_request_id: Option<i64>,
    pub canceled: bool,
    pub status: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Finished tasks are terminal: their status and cancel flag never change.
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

/// Fields required to create a task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub submission_id: ResourceId,
    pub repository_id: ResourceId,
    pub path: String,
    pub settings: TaskSettings,
    pub pull_request_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(name: &str) -> RunSettings {
        RunSettings {
            name: name.into(),
            command: vec!["make".into(), "test".into()],
            image: "debian".into(),
            queue: "default".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_dependency_only_task_is_valid() {
        let settings = TaskSettings {
            dependencies: vec!["lib".into()],
            ..Default::default()
        };
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_empty_task_is_invalid() {
        assert!(TaskSettings::default().validate().is_err());
    }

    #[test]
    fn test_runs_require_mountpoint_and_fields() {
        let mut settings = TaskSettings::default();
        settings.runs.insert("test".into(), run("test"));
        assert!(settings.validate().is_err());

        settings.mountpoint = "/src".into();
        assert!(settings.validate().is_ok());

        settings.runs.get_mut("test").unwrap().image.clear();
        assert!(settings.validate().is_err());
    }
}
