//! Submission processing and queue dispatch for ferry.
//!
//! A [`Scheduler`] turns incoming change events into tasks, runs and queue
//! items, hands queue items to workers, records their results and runs the
//! cancellation cascade. There is no in-process scheduling loop: every
//! operation is a request against the shared store.

pub mod cancel;
pub mod error;
pub mod picker;
pub mod queue;
pub mod status;
pub mod submission;

#[cfg(test)]
mod testing;

pub use error::{ErrorKind, SchedulerError, SchedulerResult, StageExt};
pub use picker::{Picked, TaskPicker};
pub use status::{GLOBAL_CONTEXT, StatusReporter, StatusWorker};
pub use submission::{RepoContext, SubmissionProcessor};

use ferry_core::codehost::{CodeHost, CodeHostFactory};
use ferry_core::queue::QueueItem;
use ferry_core::repository::Repository;
use ferry_core::submission::{Submission, SubmissionRequest};
use ferry_core::{Error, ResourceId};
use ferry_db::Repos;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{Instrument, error, info, info_span};

/// Something delivered by the webhook or CLI collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Intake {
    Submit(SubmissionRequest),
    /// The pull request was closed or superseded; cancel its work and
    /// dispatch nothing.
    CancelPullRequest {
        repository: String,
        pull_request_id: i64,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IntakeOutcome {
    Submitted(Submitted),
    Canceled { tasks: usize },
}

/// A processed submission and everything it put on the queue.
#[derive(Debug, Clone, Serialize)]
pub struct Submitted {
    pub submission: Submission,
    pub queue_items: Vec<QueueItem>,
}

#[derive(Clone)]
pub struct Scheduler {
    repos: Repos,
    hosts: Arc<dyn CodeHostFactory>,
    reporter: StatusReporter,
}

impl Scheduler {
    pub fn new(repos: Repos, hosts: Arc<dyn CodeHostFactory>, reporter: StatusReporter) -> Self {
        Self {
            repos,
            hosts,
            reporter,
        }
    }

    pub fn repos(&self) -> &Repos {
        &self.repos
    }

    pub fn reporter(&self) -> &StatusReporter {
        &self.reporter
    }

    /// Client bound to the credential of the repository's owner.
    pub async fn owner_client(&self, repository: &Repository) -> SchedulerResult<Arc<dyn CodeHost>> {
        let owner_id = repository.owner_id.ok_or_else(|| {
            Error::Forbidden(format!("no owner for repository {}", repository.name))
        })?;
        let owner = self.repos.users.get(owner_id).await?;
        Ok(self.hosts.for_token(&owner.token))
    }

    pub async fn intake(&self, intake: Intake) -> SchedulerResult<IntakeOutcome> {
        match intake {
            Intake::Submit(request) => Ok(IntakeOutcome::Submitted(self.submit(request).await?)),
            Intake::CancelPullRequest {
                repository,
                pull_request_id,
            } => {
                let tasks = self
                    .cancel_pull_request(&repository, pull_request_id)
                    .await?;
                Ok(IntakeOutcome::Canceled { tasks })
            }
        }
    }

    /// Process a submission and enqueue its runs.
    ///
    /// If enqueueing fails, every run created for the submission is finished
    /// as failed so none is left waiting for a queue item that never appears.
    /// Once the repositories are resolved, any failure is also reported as a
    /// failing [`GLOBAL_CONTEXT`] status on the head commit.
    pub async fn submit(&self, request: SubmissionRequest) -> SchedulerResult<Submitted> {
        let span = info_span!(
            "submission",
            parent = %request.parent,
            fork = %request.fork,
            head = %request.head,
            base = %request.base,
            manual = request.manual,
            all = request.all,
            submitted_by = request.submitted_by.as_deref().unwrap_or_default(),
        );

        self.dispatch(request).instrument(span).await
    }

    async fn dispatch(&self, request: SubmissionRequest) -> SchedulerResult<Submitted> {
        let ctx = SubmissionProcessor::new(self)
            .process(request)
            .await
            .stage("processing submission")?;

        let result = self.start(&ctx).await;
        if let Err(e) = &result {
            self.reporter.start_failed(
                ctx.client.clone(),
                &ctx.parent.name,
                ctx.head_sha(),
                &e.to_string(),
            );
        }
        result
    }

    async fn start(&self, ctx: &RepoContext) -> SchedulerResult<Submitted> {
        let picked = TaskPicker::new(self).pick(ctx).await.stage("picking tasks")?;

        let run_ids: Vec<ResourceId> = picked.runs.iter().map(|r| r.id).collect();
        let queue_items = match self.repos.queue.enqueue(picked.items).await {
            Ok(items) => items,
            Err(e) => {
                let message = format!("Canceled due to error: {e}");
                for run_id in run_ids {
                    if let Err(fail) = self.set_status(run_id, false, &message).await {
                        error!(run = %run_id, error = %fail, "failed to fail run after enqueue error");
                    }
                }
                return Err(e).stage("enqueueing runs");
            }
        };

        let submission = self
            .repos
            .submissions
            .get(picked.submission.id)
            .await
            .stage("reloading submission")?;

        info!(
            submission = %submission.id,
            tasks = submission.tasks_count,
            runs = submission.runs_count,
            "submission dispatched"
        );

        Ok(Submitted {
            submission,
            queue_items,
        })
    }

    pub async fn get_submission(&self, id: ResourceId) -> SchedulerResult<Submission> {
        Ok(self.repos.submissions.get(id).await?)
    }

    pub async fn get_task(&self, id: ResourceId) -> SchedulerResult<ferry_core::task::Task> {
        Ok(self.repos.tasks.get(id).await?)
    }
}
