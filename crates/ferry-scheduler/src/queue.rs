//! The worker-facing queue surface: claiming items, recording results and
//! answering cancellation polls.

use crate::Scheduler;
use crate::error::{SchedulerResult, StageExt};
use ferry_core::pagination::Page;
use ferry_core::queue::{QueueItem, queue_name_or_default};
use ferry_core::run::Run;
use ferry_core::{Error, ResourceId};
use tracing::{error, info, warn};

impl Scheduler {
    /// Claim the oldest unclaimed item on `queue_name` for `running_on`.
    ///
    /// An empty queue is a not-found error; pollers back off and retry.
    pub async fn next(&self, queue_name: &str, running_on: &str) -> SchedulerResult<QueueItem> {
        if running_on.trim().is_empty() {
            return Err(Error::invalid("running_on is required").into());
        }
        let queue_name = queue_name_or_default(queue_name);

        let item = self.repos.queue.dequeue(queue_name, running_on).await?;
        let target = self
            .repos
            .tasks
            .target(item.run.task_id)
            .await
            .stage("resolving run target")?;

        let Some(owner) = target.owner else {
            let message = format!("no owner for repository {}", target.repository.name);
            if let Err(e) = self.repos.runs.finish(item.run.id, false).await {
                error!(run = %item.run.id, error = %e, "failed to fail owner-less run");
            }
            return Err(Error::Forbidden(message).into());
        };

        let client = self.hosts.for_token(&owner.token);
        self.reporter
            .started(client, &target.repository.name, &target.sha, &item.run);

        info!(
            run = %item.run.id,
            name = %item.run.name,
            queue = %item.queue_name,
            running_on,
            "queue item claimed"
        );
        Ok(item)
    }

    /// Record a run's terminal status. A second call for the same run is a
    /// conflict whatever the values passed.
    pub async fn set_status(
        &self,
        run_id: ResourceId,
        success: bool,
        message: &str,
    ) -> SchedulerResult<Run> {
        let completion = self.repos.runs.finish(run_id, success).await?;
        let run = completion.run;

        match self.repos.tasks.target(run.task_id).await {
            Ok(target) => match target.owner {
                Some(owner) => self.reporter.finished(
                    self.hosts.for_token(&owner.token),
                    &target.repository.name,
                    &target.sha,
                    &run,
                    success,
                    message,
                ),
                None => warn!(run = %run.id, repository = %target.repository.name, "no owner; status not posted"),
            },
            Err(e) => warn!(run = %run.id, error = %e, "failed to resolve run target; status not posted"),
        }

        info!(
            run = %run.id,
            name = %run.name,
            success,
            task_status = ?completion.task_status,
            "run finished"
        );
        Ok(run)
    }

    /// Cancel the task owning `run_id`.
    pub async fn set_cancel(&self, run_id: ResourceId) -> SchedulerResult<()> {
        self.cancel_run(run_id).await?;
        Ok(())
    }

    /// Whether the task owning `run_id` was canceled. Workers poll this to
    /// stop a run already executing.
    pub async fn get_cancel(&self, run_id: ResourceId) -> SchedulerResult<bool> {
        let run = self.repos.runs.get(run_id).await?;
        let task = self.repos.tasks.get(run.task_id).await?;
        Ok(task.canceled)
    }

    pub async fn list_queue(
        &self,
        page: Page,
        repository: Option<&str>,
    ) -> SchedulerResult<Vec<QueueItem>> {
        match repository {
            Some(name) => {
                let repo = self.repos.repositories.get_by_name(name).await?;
                Ok(self.repos.queue.list_for_repository(repo.id, page).await?)
            }
            None => Ok(self.repos.queue.list(page).await?),
        }
    }

    pub async fn count_queue(&self, repository: Option<&str>) -> SchedulerResult<i64> {
        match repository {
            Some(name) => {
                let repo = self.repos.repositories.get_by_name(name).await?;
                Ok(self.repos.queue.count_for_repository(repo.id).await?)
            }
            None => Ok(self.repos.queue.count().await?),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::{Fixture, SHA_HEAD};
    use ferry_core::codehost::StatusState;
    use ferry_core::pagination::Page;

    const TASK: &str = r#"
        mountpoint "/src"
        default-image "rust:1"
        run "test" {
            command "cargo" "test"
        }
    "#;

    #[tokio::test]
    async fn test_next_posts_started_status() {
        let mut fx = Fixture::new().await;
        fx.host.add_task(".", TASK);
        fx.host.set_diff(&["src/lib.rs"]);

        let submitted = fx.scheduler.submit(fx.hook_request()).await.unwrap();
        assert_eq!(submitted.queue_items.len(), 1);
        fx.worker.drain().await;

        let item = fx.scheduler.next("", "worker-1").await.unwrap();
        assert!(item.running);
        assert_eq!(item.running_on.as_deref(), Some("worker-1"));
        assert_eq!(item.run.name, "*root*:test");

        fx.worker.drain().await;
        let statuses = fx.host.statuses();
        let last = statuses.last().unwrap();
        assert_eq!(last.1, SHA_HEAD);
        assert_eq!(last.2.description, "The run has started!");
        assert_eq!(last.2.state, StatusState::Pending);

        let err = fx.scheduler.next("default", "worker-2").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_next_requires_claimant() {
        let fx = Fixture::new().await;
        let err = fx.scheduler.next("default", " ").await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Invalid);
    }

    #[tokio::test]
    async fn test_set_status_exactly_once() {
        let mut fx = Fixture::new().await;
        fx.host.add_task(".", TASK);
        fx.host.set_diff(&["src/lib.rs"]);

        fx.scheduler.submit(fx.hook_request()).await.unwrap();
        let item = fx.scheduler.next("default", "worker-1").await.unwrap();

        let run = fx.scheduler.set_status(item.run.id, true, "all good").await.unwrap();
        assert_eq!(run.status, Some(true));

        let err = fx
            .scheduler
            .set_status(item.run.id, false, "again")
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let task = fx.scheduler.get_task(run.task_id).await.unwrap();
        assert_eq!(task.status, Some(true));
        assert!(task.finished_at.is_some());

        fx.worker.drain().await;
        let statuses = fx.host.statuses();
        let last = statuses.last().unwrap();
        assert_eq!(last.2.state, StatusState::Success);
        assert_eq!(last.2.description, "The run finished: success! all good");
        assert_eq!(fx.scheduler.count_queue(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cancel_flag_and_listing() {
        let fx = Fixture::new().await;
        fx.host.add_task(".", TASK);
        fx.host.set_diff(&["src/lib.rs"]);

        fx.scheduler.submit(fx.hook_request()).await.unwrap();
        let items = fx
            .scheduler
            .list_queue(Page::default(), Some("erikh/foo"))
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(fx.scheduler.count_queue(Some("erikh/foo")).await.unwrap(), 1);

        let run_id = items[0].run.id;
        assert!(!fx.scheduler.get_cancel(run_id).await.unwrap());
        fx.scheduler.set_cancel(run_id).await.unwrap();
        assert!(fx.scheduler.get_cancel(run_id).await.unwrap());
        assert_eq!(fx.scheduler.count_queue(None).await.unwrap(), 0);

        assert!(fx.scheduler.set_cancel(run_id).await.unwrap_err().is_conflict());
    }
}
