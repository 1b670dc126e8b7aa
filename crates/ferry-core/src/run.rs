//! Runs: the executable sub-units of a task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::RunSettings;
use crate::{Error, ResourceId, Result};

/// Directory label used in run names for the repository root.
pub const ROOT_LABEL: &str = "*root*";

/// Build the display name of a run: `<dir>:<run>`, with the repository root
/// rendered as `*root*`.
pub fn run_name(dir: &str, run: &str) -> String {
    let dir = if dir.is_empty() || dir == "." { ROOT_LABEL } else { dir };
    format!("{dir}:{run}")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: ResourceId,
    pub task_id: ResourceId,
    pub name: String,
    pub settings: RunSettings,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Set exactly once.
    pub status: Option<bool>,
}

/// Fields required to create a run.
#[derive(Debug, Clone)]
pub struct NewRun {
    pub task_id: ResourceId,
    pub name: String,
    pub settings: RunSettings,
}

impl NewRun {
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::invalid("run name was empty"));
        }
        self.settings.validate()
    }
}

/// Outcome of recording a run's terminal status.
#[derive(Debug, Clone)]
pub struct RunCompletion {
    pub run: Run,
    /// Set when this run was the last open run of its task; carries the
    /// task's rolled-up status.
    pub task_status: Option<bool>,
}
