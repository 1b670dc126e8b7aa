//! Queue items: dispatch records handed to remote workers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::run::Run;
use crate::{Error, ResourceId, Result};

pub const DEFAULT_QUEUE: &str = "default";

/// Return the queue name, substituting `default` for an empty one.
pub fn queue_name_or_default(name: &str) -> &str {
    if name.is_empty() { DEFAULT_QUEUE } else { name }
}

/// A run waiting for, or claimed by, a worker.
///
/// `running == false` means the item may be claimed. Once claimed it is never
/// reassigned; it leaves the queue when the run's status is recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: ResourceId,
    pub run: Run,
    pub running: bool,
    pub running_on: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub queue_name: String,
}

impl QueueItem {
    pub fn validate(&self) -> Result<()> {
        if self.queue_name.is_empty() {
            return Err(Error::invalid("queue name was empty"));
        }
        Ok(())
    }

    pub fn validate_running(&self) -> Result<()> {
        if self.running_on.as_deref().unwrap_or_default().is_empty() {
            return Err(Error::invalid("missing run target hostname"));
        }
        if !self.running {
            return Err(Error::invalid("was not flagged running, yet should be"));
        }
        Ok(())
    }
}

/// A queue item to be enqueued for an already-created run.
#[derive(Debug, Clone)]
pub struct NewQueueItem {
    pub run_id: ResourceId,
    pub queue_name: String,
}

impl NewQueueItem {
    pub fn new(run_id: ResourceId, queue_name: &str) -> Self {
        Self {
            run_id,
            queue_name: queue_name_or_default(queue_name).to_string(),
        }
    }
}
