//! The cancellation cascade. Every entry point ends in [`Scheduler::cancel_task`].

use crate::Scheduler;
use crate::error::SchedulerResult;
use ferry_core::ResourceId;
use ferry_core::run::Run;
use tracing::{debug, error, info, warn};

const CANCELED_MESSAGE: &str = "The run was canceled.";

impl Scheduler {
    /// Cancel a task: its open runs fail and leave the queue, and the task is
    /// finished as canceled. A finished task cannot be canceled.
    pub async fn cancel_task(&self, task_id: ResourceId) -> SchedulerResult<Vec<Run>> {
        let runs = self.repos.tasks.cancel(task_id).await?;

        match self.repos.tasks.target(task_id).await {
            Ok(target) => {
                if let Some(owner) = target.owner {
                    let client = self.hosts.for_token(&owner.token);
                    for run in &runs {
                        self.reporter.errored(
                            client.clone(),
                            &target.repository.name,
                            &target.sha,
                            run,
                            CANCELED_MESSAGE,
                        );
                    }
                }
            }
            Err(e) => warn!(task = %task_id, error = %e, "failed to resolve task target; statuses not posted"),
        }

        info!(task = %task_id, runs = runs.len(), "task canceled");
        Ok(runs)
    }

    pub async fn cancel_run(&self, run_id: ResourceId) -> SchedulerResult<Vec<Run>> {
        let run = self.repos.runs.get(run_id).await?;
        self.cancel_task(run.task_id).await
    }

    /// Cancel unfinished work for `ref_name` in a repository, unless the ref
    /// is the repository's default branch. Returns how many tasks were
    /// canceled.
    pub async fn cancel_ref(
        &self,
        repository_id: ResourceId,
        ref_name: &str,
        default_branch: &str,
    ) -> SchedulerResult<usize> {
        if ref_name == default_branch {
            debug!(ref_name, "not canceling work on the default branch");
            return Ok(0);
        }

        let tasks = self
            .repos
            .tasks
            .open_for_head_ref(repository_id, ref_name)
            .await?;

        let mut canceled = 0;
        for task in tasks {
            match self.cancel_task(task.id).await {
                Ok(_) => canceled += 1,
                // finished between the lookup and the cancel
                Err(e) if e.is_conflict() => debug!(task = %task.id, "task already finished"),
                Err(e) => return Err(e),
            }
        }
        Ok(canceled)
    }

    /// Cancel unfinished work for a pull request. Tasks whose repository has
    /// no owner are skipped.
    pub async fn cancel_pull_request(
        &self,
        repository: &str,
        pull_request_id: i64,
    ) -> SchedulerResult<usize> {
        let tasks = self
            .repos
            .tasks
            .open_for_pull_request(repository, pull_request_id)
            .await?;

        let mut canceled = 0;
        for task in tasks {
            let target = self.repos.tasks.target(task.id).await?;
            if target.owner.is_none() {
                warn!(task = %task.id, repository, "skipping task without an owner");
                continue;
            }

            match self.cancel_task(task.id).await {
                Ok(_) => canceled += 1,
                Err(e) if e.is_conflict() => debug!(task = %task.id, "task already finished"),
                Err(e) => return Err(e),
            }
        }

        info!(repository, pull_request_id, canceled, "pull request canceled");
        Ok(canceled)
    }

    /// Cancel every unfinished task of a submission. Failures are logged and
    /// the remaining tasks are still canceled.
    pub async fn cancel_submission(&self, submission_id: ResourceId) -> SchedulerResult<usize> {
        self.repos.submissions.get(submission_id).await?;
        let tasks = self
            .repos
            .tasks
            .list_for_submission(submission_id)
            .await?;

        let mut canceled = 0;
        for task in tasks.into_iter().filter(|t| !t.is_finished()) {
            match self.cancel_task(task.id).await {
                Ok(_) => canceled += 1,
                Err(e) => error!(task = %task.id, error = %e, "failed to cancel task"),
            }
        }
        Ok(canceled)
    }
}

#[cfg(test)]
mod tests {
    use crate::Intake;
    use crate::IntakeOutcome;
    use crate::testing::Fixture;
    use ferry_core::codehost::StatusState;
    use ferry_core::submission::SubmissionRequest;

    const TASK: &str = r#"
        mountpoint "/src"
        default-image "rust:1"
        run "test" {
            command "cargo" "test"
        }
        run "lint" {
            command "cargo" "clippy"
        }
    "#;

    #[tokio::test]
    async fn test_cancel_task_is_terminal() {
        let mut fx = Fixture::new().await;
        fx.host.add_task(".", TASK);
        fx.host.set_diff(&["README.md"]);

        let submitted = fx.scheduler.submit(fx.hook_request()).await.unwrap();
        assert_eq!(submitted.queue_items.len(), 2);
        let task_id = submitted.queue_items[0].run.task_id;
        fx.worker.drain().await;

        let runs = fx.scheduler.cancel_task(task_id).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert!(runs.iter().all(|r| r.status == Some(false)));

        let task = fx.scheduler.get_task(task_id).await.unwrap();
        assert!(task.canceled);
        assert_eq!(task.status, Some(false));
        assert_eq!(fx.scheduler.count_queue(None).await.unwrap(), 0);

        fx.worker.drain().await;
        let errors = fx
            .host
            .statuses()
            .into_iter()
            .filter(|s| s.2.state == StatusState::Error)
            .count();
        assert_eq!(errors, 2);

        assert!(fx.scheduler.cancel_task(task_id).await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn test_new_push_cancels_previous_work_on_branch() {
        let fx = Fixture::new().await;
        fx.host.add_task(".", TASK);
        fx.host.set_diff(&["README.md"]);

        let first = fx.scheduler.submit(fx.hook_request()).await.unwrap();
        let first_task = first.queue_items[0].run.task_id;

        fx.host.push_head("heads/feature", crate::testing::SHA_NEXT);
        let second = fx
            .scheduler
            .submit(SubmissionRequest {
                head: crate::testing::SHA_NEXT.into(),
                ..fx.hook_request()
            })
            .await
            .unwrap();

        assert!(fx.scheduler.get_task(first_task).await.unwrap().canceled);
        let second_task = second.queue_items[0].run.task_id;
        assert!(!fx.scheduler.get_task(second_task).await.unwrap().canceled);
        assert_eq!(fx.scheduler.count_queue(None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_new_push_cancels_work_without_head_ref() {
        let fx = Fixture::new().await;
        fx.host.add_task(".", TASK);

        let first = fx
            .scheduler
            .submit(SubmissionRequest {
                base: ferry_core::git::ZERO_SHA.into(),
                ..fx.hook_request()
            })
            .await
            .unwrap();
        assert!(first.submission.head_ref.is_none());
        let first_task = first.queue_items[0].run.task_id;

        fx.host.push_head("heads/feature", crate::testing::SHA_NEXT);
        fx.host.set_diff(&["README.md"]);
        fx.scheduler
            .submit(SubmissionRequest {
                head: crate::testing::SHA_NEXT.into(),
                ..fx.hook_request()
            })
            .await
            .unwrap();

        assert!(fx.scheduler.get_task(first_task).await.unwrap().canceled);
    }

    #[tokio::test]
    async fn test_ref_cancel_skips_default_branch() {
        let fx = Fixture::new().await;
        fx.host.add_task(".", TASK);

        fx.host.push_head("heads/main", crate::testing::SHA_HEAD);
        let submitted = fx.scheduler.submit(fx.hook_request()).await.unwrap();
        let task_id = submitted.queue_items[0].run.task_id;
        let fork_ref = submitted.submission.tested_ref().clone();
        assert_eq!(fork_ref.ref_name, "heads/main");

        let canceled = fx
            .scheduler
            .cancel_ref(fork_ref.repository_id, "heads/main", "heads/main")
            .await
            .unwrap();
        assert_eq!(canceled, 0);
        assert!(!fx.scheduler.get_task(task_id).await.unwrap().canceled);

        let canceled = fx
            .scheduler
            .cancel_ref(fork_ref.repository_id, "heads/main", "heads/trunk")
            .await
            .unwrap();
        assert_eq!(canceled, 1);
    }

    #[tokio::test]
    async fn test_cancel_pull_request_intake() {
        let fx = Fixture::new().await;
        fx.host.add_task(".", TASK);
        fx.host.set_diff(&["README.md"]);

        let submitted = fx
            .scheduler
            .submit(SubmissionRequest {
                pull_request_id: Some(7),
                ..fx.hook_request()
            })
            .await
            .unwrap();
        let task_id = submitted.queue_items[0].run.task_id;

        let outcome = fx
            .scheduler
            .intake(Intake::CancelPullRequest {
                repository: "erikh/foo".into(),
                pull_request_id: 7,
            })
            .await
            .unwrap();
        assert!(matches!(outcome, IntakeOutcome::Canceled { tasks: 1 }));
        assert!(fx.scheduler.get_task(task_id).await.unwrap().canceled);

        let outcome = fx
            .scheduler
            .intake(Intake::CancelPullRequest {
                repository: "erikh/foo".into(),
                pull_request_id: 7,
            })
            .await
            .unwrap();
        assert!(matches!(outcome, IntakeOutcome::Canceled { tasks: 0 }));
    }

    #[tokio::test]
    async fn test_cancel_submission() {
        let fx = Fixture::new().await;
        fx.host.add_task(".", TASK);
        fx.host.add_task("a", TASK);
        fx.host.set_diff(&["a/main.rs"]);

        let submitted = fx.scheduler.submit(fx.hook_request()).await.unwrap();
        assert_eq!(submitted.submission.tasks_count, 2);

        let canceled = fx
            .scheduler
            .cancel_submission(submitted.submission.id)
            .await
            .unwrap();
        assert_eq!(canceled, 2);
        assert_eq!(fx.scheduler.count_queue(None).await.unwrap(), 0);
        assert_eq!(
            fx.scheduler
                .cancel_submission(submitted.submission.id)
                .await
                .unwrap(),
            0
        );
    }
}
