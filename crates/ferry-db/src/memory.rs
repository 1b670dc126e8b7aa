//! In-memory implementation of every repository trait.
//!
//! All state sits behind one mutex, so every operation is trivially atomic
//! and concurrent dequeues serialize exactly like the table lock they stand
//! in for. Used by tests and by `ferry-api --in-memory`.

use async_trait::async_trait;
use chrono::Utc;
use ferry_core::ResourceId;
use ferry_core::git::{NewRef, Ref};
use ferry_core::pagination::Page;
use ferry_core::queue::{NewQueueItem, QueueItem};
use ferry_core::repository::{NewRepository, Repository, User, owner_repo};
use ferry_core::run::{NewRun, Run, RunCompletion};
use ferry_core::submission::{NewSubmission, Submission};
use ferry_core::task::{NewTask, Task};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

use crate::repo::{
    QueueRepo, RefRepo, RepositoryRepo, RunRepo, SubmissionRepo, TaskRepo, TaskTarget, UserRepo,
};
use crate::{DbError, DbResult};

#[derive(Debug, Clone)]
struct StoredSubmission {
    id: ResourceId,
    base_ref_id: ResourceId,
    head_ref_id: Option<ResourceId>,
    submitted_by: Option<ResourceId>,
    ticket_id: Option<i64>,
    created_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct StoredQueueItem {
    id: ResourceId,
    run_id: ResourceId,
    queue_name: String,
    running: bool,
    running_on: Option<String>,
    started_at: Option<chrono::DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct State {
    users: HashMap<ResourceId, User>,
    repositories: HashMap<ResourceId, Repository>,
    refs: HashMap<ResourceId, Ref>,
    submissions: HashMap<ResourceId, StoredSubmission>,
    tasks: HashMap<ResourceId, Task>,
    runs: HashMap<ResourceId, Run>,
    /// Keyed by insertion position.
    queue: BTreeMap<u64, StoredQueueItem>,
    next_position: u64,
}

impl State {
    fn repository(&self, id: ResourceId) -> DbResult<&Repository> {
        self.repositories
            .get(&id)
            .ok_or_else(|| DbError::NotFound(format!("repository {id}")))
    }

    fn git_ref(&self, id: ResourceId) -> DbResult<&Ref> {
        self.refs
            .get(&id)
            .ok_or_else(|| DbError::NotFound(format!("ref {id}")))
    }

    fn task(&self, id: ResourceId) -> DbResult<&Task> {
        self.tasks
            .get(&id)
            .ok_or_else(|| DbError::NotFound(format!("task {id}")))
    }

    fn run(&self, id: ResourceId) -> DbResult<&Run> {
        self.runs
            .get(&id)
            .ok_or_else(|| DbError::NotFound(format!("run {id}")))
    }

    fn submission(&self, id: ResourceId) -> DbResult<Submission> {
        let stored = self
            .submissions
            .get(&id)
            .ok_or_else(|| DbError::NotFound(format!("submission {id}")))?;

        let task_ids: Vec<ResourceId> = self
            .tasks
            .values()
            .filter(|t| t.submission_id == id)
            .map(|t| t.id)
            .collect();
        let runs_count = self
            .runs
            .values()
            .filter(|r| task_ids.contains(&r.task_id))
            .count();

        Ok(Submission {
            id: stored.id,
            base_ref: self.git_ref(stored.base_ref_id)?.clone(),
            head_ref: match stored.head_ref_id {
                Some(head) => Some(self.git_ref(head)?.clone()),
                None => None,
            },
            submitted_by: stored.submitted_by,
            ticket_id: stored.ticket_id,
            created_at: stored.created_at,
            tasks_count: task_ids.len() as i64,
            runs_count: runs_count as i64,
        })
    }

    fn queue_item(&self, stored: &StoredQueueItem) -> DbResult<QueueItem> {
        Ok(QueueItem {
            id: stored.id,
            run: self.run(stored.run_id)?.clone(),
            running: stored.running,
            running_on: stored.running_on.clone(),
            started_at: stored.started_at,
            queue_name: stored.queue_name.clone(),
        })
    }

    fn remove_queue_item_for(&mut self, run_id: ResourceId) {
        self.queue.retain(|_, item| item.run_id != run_id);
    }

    fn run_repository(&self, run_id: ResourceId) -> Option<ResourceId> {
        let run = self.runs.get(&run_id)?;
        self.tasks.get(&run.task_id).map(|t| t.repository_id)
    }

    fn page(&self, page: Page, repository_id: Option<ResourceId>) -> DbResult<Vec<QueueItem>> {
        self.queue
            .values()
            .filter(|item| {
                repository_id.is_none() || self.run_repository(item.run_id) == repository_id
            })
            .skip(page.offset() as usize)
            .take(page.per_page as usize)
            .map(|item| self.queue_item(item))
            .collect()
    }
}

/// In-memory store implementing every repository trait.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepo for MemoryStore {
    async fn create(&self, username: &str, token: &str) -> DbResult<User> {
        let mut state = self.state.lock().await;
        if state.users.values().any(|u| u.username == username) {
            return Err(DbError::Duplicate(format!("user {username}")));
        }

        let user = User {
            id: ResourceId::new(),
            username: username.to_string(),
            token: token.to_string(),
            created_at: Utc::now(),
        };
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get(&self, id: ResourceId) -> DbResult<User> {
        let state = self.state.lock().await;
        state
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("user {id}")))
    }

    async fn get_by_username(&self, username: &str) -> DbResult<User> {
        let state = self.state.lock().await;
        state
            .users
            .values()
            .find(|u| u.username == username)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("user {username}")))
    }
}

#[async_trait]
impl RepositoryRepo for MemoryStore {
    async fn create(&self, new: NewRepository) -> DbResult<Repository> {
        owner_repo(&new.name)?;

        let mut state = self.state.lock().await;
        if state.repositories.values().any(|r| r.name == new.name) {
            return Err(DbError::Duplicate(format!("repository {}", new.name)));
        }

        let repo = Repository {
            id: ResourceId::new(),
            hook_secret: if new.disabled { None } else { new.hook_secret },
            name: new.name,
            private: new.private,
            disabled: new.disabled,
            default_branch: new.default_branch,
            metadata: new.metadata,
            owner_id: new.owner_id,
            created_at: Utc::now(),
        };
        state.repositories.insert(repo.id, repo.clone());
        Ok(repo)
    }

    async fn get(&self, id: ResourceId) -> DbResult<Repository> {
        let state = self.state.lock().await;
        state.repository(id).cloned()
    }

    async fn get_by_name(&self, name: &str) -> DbResult<Repository> {
        let state = self.state.lock().await;
        state
            .repositories
            .values()
            .find(|r| r.name == name)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("repository {name}")))
    }
}

#[async_trait]
impl RefRepo for MemoryStore {
    async fn get(&self, id: ResourceId) -> DbResult<Ref> {
        let state = self.state.lock().await;
        state.git_ref(id).cloned()
    }

    async fn get_by_sha(&self, repository_id: ResourceId, sha: &str) -> DbResult<Ref> {
        let state = self.state.lock().await;
        state
            .refs
            .values()
            .find(|r| r.repository_id == repository_id && r.sha == sha)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("ref {sha} in repository {repository_id}")))
    }

    async fn find_or_create(&self, new: NewRef) -> DbResult<Ref> {
        new.validate()?;

        let mut state = self.state.lock().await;
        state.repository(new.repository_id)?;

        if let Some(existing) = state
            .refs
            .values()
            .find(|r| r.repository_id == new.repository_id && r.sha == new.sha)
        {
            return Ok(existing.clone());
        }

        let git_ref = Ref {
            id: ResourceId::new(),
            repository_id: new.repository_id,
            ref_name: new.ref_name,
            sha: new.sha,
        };
        state.refs.insert(git_ref.id, git_ref.clone());
        Ok(git_ref)
    }
}

#[async_trait]
impl SubmissionRepo for MemoryStore {
    async fn create(&self, new: NewSubmission) -> DbResult<Submission> {
        let mut state = self.state.lock().await;
        state.git_ref(new.base_ref_id)?;
        if let Some(head) = new.head_ref_id {
            state.git_ref(head)?;
        }

        let stored = StoredSubmission {
            id: ResourceId::new(),
            base_ref_id: new.base_ref_id,
            head_ref_id: new.head_ref_id,
            submitted_by: new.submitted_by,
            ticket_id: new.ticket_id,
            created_at: Utc::now(),
        };
        let id = stored.id;
        state.submissions.insert(id, stored);
        state.submission(id)
    }

    async fn get(&self, id: ResourceId) -> DbResult<Submission> {
        let state = self.state.lock().await;
        state.submission(id)
    }
}

#[async_trait]
impl TaskRepo for MemoryStore {
    async fn create(&self, new: NewTask) -> DbResult<Task> {
        new.settings.validate()?;

        let mut state = self.state.lock().await;
        if !state.submissions.contains_key(&new.submission_id) {
            return Err(DbError::NotFound(format!("submission {}", new.submission_id)));
        }
        state.repository(new.repository_id)?;

        let task = Task {
            id: ResourceId::new(),
            submission_id: new.submission_id,
            repository_id: new.repository_id,
            path: new.path,
            settings: new.settings,
            pull_request_id: new.pull_request_id,
            canceled: false,
            status: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };
        state.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn get(&self, id: ResourceId) -> DbResult<Task> {
        let state = self.state.lock().await;
        state.task(id).cloned()
    }

    async fn list_for_submission(&self, submission_id: ResourceId) -> DbResult<Vec<Task>> {
        let state = self.state.lock().await;
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| t.submission_id == submission_id)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(tasks)
    }

    async fn open_for_head_ref(
        &self,
        repository_id: ResourceId,
        ref_name: &str,
    ) -> DbResult<Vec<Task>> {
        let state = self.state.lock().await;
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| t.status.is_none() && !t.is_finished())
            .filter(|t| {
                state
                    .submissions
                    .get(&t.submission_id)
                    .map(|s| s.head_ref_id.unwrap_or(s.base_ref_id))
                    .and_then(|tested| state.refs.get(&tested))
                    .is_some_and(|r| r.repository_id == repository_id && r.ref_name == ref_name)
            })
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    async fn open_for_pull_request(
        &self,
        repository: &str,
        pull_request_id: i64,
    ) -> DbResult<Vec<Task>> {
        let state = self.state.lock().await;
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| t.pull_request_id == Some(pull_request_id) && !t.is_finished())
            .filter(|t| {
                state
                    .repositories
                    .get(&t.repository_id)
                    .is_some_and(|r| r.name == repository)
            })
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    async fn target(&self, id: ResourceId) -> DbResult<TaskTarget> {
        let state = self.state.lock().await;
        let task = state.task(id)?;
        let repository = state.repository(task.repository_id)?.clone();
        let owner = repository
            .owner_id
            .and_then(|owner| state.users.get(&owner).cloned());
        let sha = state.submission(task.submission_id)?.tested_ref().sha.clone();

        Ok(TaskTarget {
            repository,
            owner,
            sha,
        })
    }

    async fn cancel(&self, id: ResourceId) -> DbResult<Vec<Run>> {
        let mut state = self.state.lock().await;
        if state.task(id)?.is_finished() {
            return Err(DbError::Conflict(format!(
                "task {id} was already finished; cannot cancel"
            )));
        }

        let now = Utc::now();
        let mut canceled = Vec::new();
        for run in state.runs.values_mut() {
            if run.task_id == id && run.status.is_none() {
                run.status = Some(false);
                run.finished_at = Some(now);
                canceled.push(run.clone());
            }
        }
        for run in &canceled {
            state.remove_queue_item_for(run.id);
        }

        if let Some(task) = state.tasks.get_mut(&id) {
            task.canceled = true;
            task.status = Some(false);
            task.finished_at = Some(now);
        }

        canceled.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(canceled)
    }
}

#[async_trait]
impl RunRepo for MemoryStore {
    async fn create(&self, new: NewRun) -> DbResult<Run> {
        new.validate()?;

        let mut state = self.state.lock().await;
        state.task(new.task_id)?;

        let run = Run {
            id: ResourceId::new(),
            task_id: new.task_id,
            name: new.name,
            settings: new.settings,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            status: None,
        };
        state.runs.insert(run.id, run.clone());
        Ok(run)
    }

    async fn get(&self, id: ResourceId) -> DbResult<Run> {
        let state = self.state.lock().await;
        state.run(id).cloned()
    }

    async fn list_for_task(&self, task_id: ResourceId) -> DbResult<Vec<Run>> {
        let state = self.state.lock().await;
        let mut runs: Vec<Run> = state
            .runs
            .values()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(runs)
    }

    async fn finish(&self, id: ResourceId, status: bool) -> DbResult<RunCompletion> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let run = state
            .runs
            .get_mut(&id)
            .ok_or_else(|| DbError::NotFound(format!("run {id}")))?;
        if run.status.is_some() {
            return Err(DbError::Conflict(format!("status already set for run {id}")));
        }
        run.status = Some(status);
        run.finished_at = Some(now);
        let run = run.clone();

        state.remove_queue_item_for(id);

        let mut task_status = None;
        if !state.task(run.task_id)?.is_finished() {
            let statuses: Vec<Option<bool>> = state
                .runs
                .values()
                .filter(|r| r.task_id == run.task_id)
                .map(|r| r.status)
                .collect();

            if statuses.iter().all(Option::is_some) {
                let rolled_up = statuses.iter().all(|s| *s == Some(true));
                if let Some(task) = state.tasks.get_mut(&run.task_id) {
                    task.status = Some(rolled_up);
                    task.finished_at = Some(now);
                }
                task_status = Some(rolled_up);
            }
        }

        Ok(RunCompletion { run, task_status })
    }
}

#[async_trait]
impl QueueRepo for MemoryStore {
    async fn enqueue(&self, items: Vec<NewQueueItem>) -> DbResult<Vec<QueueItem>> {
        let mut state = self.state.lock().await;

        // validate the whole batch before touching the queue
        for (i, item) in items.iter().enumerate() {
            if item.queue_name.is_empty() {
                return Err(DbError::Validation(ferry_core::Error::invalid(
                    "queue name was empty",
                )));
            }
            state.run(item.run_id)?;
            let duplicate = state.queue.values().any(|q| q.run_id == item.run_id)
                || items[..i].iter().any(|other| other.run_id == item.run_id);
            if duplicate {
                return Err(DbError::Duplicate(format!(
                    "queue item for run {}",
                    item.run_id
                )));
            }
        }

        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let stored = StoredQueueItem {
                id: ResourceId::new(),
                run_id: item.run_id,
                queue_name: item.queue_name,
                running: false,
                running_on: None,
                started_at: None,
            };
            out.push(state.queue_item(&stored)?);

            let position = state.next_position;
            state.next_position += 1;
            state.queue.insert(position, stored);
        }

        Ok(out)
    }

    async fn dequeue(&self, queue_name: &str, running_on: &str) -> DbResult<QueueItem> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let position = state
            .queue
            .iter()
            .find(|(_, item)| item.queue_name == queue_name && !item.running)
            .map(|(position, _)| *position)
            .ok_or_else(|| DbError::NotFound(format!("no queue items waiting on {queue_name}")))?;

        let run_id = {
            let item = state
                .queue
                .get_mut(&position)
                .ok_or_else(|| DbError::InvalidData(format!("queue position {position}")))?;
            item.running = true;
            item.running_on = Some(running_on.to_string());
            item.started_at = Some(now);
            item.run_id
        };

        let task_id = {
            let run = state
                .runs
                .get_mut(&run_id)
                .ok_or_else(|| DbError::InvalidData(format!("queue item for missing run {run_id}")))?;
            run.started_at = Some(now);
            run.task_id
        };

        if let Some(task) = state.tasks.get_mut(&task_id) {
            task.started_at.get_or_insert(now);
        }

        let item = state
            .queue
            .get(&position)
            .ok_or_else(|| DbError::InvalidData(format!("queue position {position}")))?;
        state.queue_item(item)
    }

    async fn list(&self, page: Page) -> DbResult<Vec<QueueItem>> {
        let state = self.state.lock().await;
        state.page(page, None)
    }

    async fn list_for_repository(
        &self,
        repository_id: ResourceId,
        page: Page,
    ) -> DbResult<Vec<QueueItem>> {
        let state = self.state.lock().await;
        state.page(page, Some(repository_id))
    }

    async fn count(&self) -> DbResult<i64> {
        let state = self.state.lock().await;
        Ok(state.queue.len() as i64)
    }

    async fn count_for_repository(&self, repository_id: ResourceId) -> DbResult<i64> {
        let state = self.state.lock().await;
        let count = state
            .queue
            .values()
            .filter(|item| state.run_repository(item.run_id) == Some(repository_id))
            .count();
        Ok(count as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Repos;
    use ferry_core::task::{RunSettings, TaskSettings};
    use std::collections::HashSet;
    use std::sync::Arc;

    const SHA: &str = "be3d26c478991039e951097f2c99f56b55396941";

    fn run_settings(name: &str, queue: &str) -> RunSettings {
        RunSettings {
            name: name.into(),
            command: vec!["make".into(), name.into()],
            image: "debian".into(),
            queue: queue.into(),
            ..Default::default()
        }
    }

    /// A repository, a submission, one task and `runs` runs on `queue`.
    async fn seed(repos: &Repos, runs: usize, queue: &str) -> (Task, Vec<Run>) {
        let owner = repos.users.create("erikh", "token").await.unwrap();
        let repo = repos
            .repositories
            .create(NewRepository {
                name: "erikh/foo".into(),
                private: false,
                disabled: false,
                default_branch: Some("main".into()),
                metadata: serde_json::json!({}),
                owner_id: Some(owner.id),
                hook_secret: Some("secret".into()),
            })
            .await
            .unwrap();
        let base = repos
            .refs
            .find_or_create(NewRef {
                repository_id: repo.id,
                ref_name: "heads/feature".into(),
                sha: SHA.into(),
            })
            .await
            .unwrap();
        let sub = repos
            .submissions
            .create(NewSubmission {
                base_ref_id: base.id,
                head_ref_id: None,
                submitted_by: None,
                ticket_id: Some(7),
            })
            .await
            .unwrap();

        let mut settings = TaskSettings {
            mountpoint: "/src".into(),
            ..Default::default()
        };
        for i in 0..runs {
            let name = format!("r{i:02}");
            settings.runs.insert(name.clone(), run_settings(&name, queue));
        }

        let task = repos
            .tasks
            .create(NewTask {
                submission_id: sub.id,
                repository_id: repo.id,
                path: ".".into(),
                settings: settings.clone(),
                pull_request_id: Some(7),
            })
            .await
            .unwrap();

        let mut created = Vec::new();
        for (name, rs) in settings.runs {
            created.push(
                repos
                    .runs
                    .create(NewRun {
                        task_id: task.id,
                        name: format!("*root*:{name}"),
                        settings: rs,
                    })
                    .await
                    .unwrap(),
            );
        }
        (task, created)
    }

    async fn enqueue_all(repos: &Repos, runs: &[Run]) -> Vec<QueueItem> {
        let items = runs
            .iter()
            .map(|r| NewQueueItem::new(r.id, &r.settings.queue))
            .collect();
        repos.queue.enqueue(items).await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_are_exclusive() {
        let repos = Repos::in_memory();
        let (_, runs) = seed(&repos, 5, "default").await;
        enqueue_all(&repos, &runs).await;

        let handles: Vec<_> = (0..12)
            .map(|i| {
                let queue = Arc::clone(&repos.queue);
                tokio::spawn(async move { queue.dequeue("default", &format!("worker-{i}")).await })
            })
            .collect();

        let results = futures::future::join_all(handles).await;
        let mut claimed = HashSet::new();
        let mut not_found = 0;
        for result in results {
            match result.unwrap() {
                Ok(item) => assert!(claimed.insert(item.id), "item claimed twice"),
                Err(e) => {
                    assert!(e.is_not_found());
                    not_found += 1;
                }
            }
        }

        assert_eq!(claimed.len(), 5);
        assert_eq!(not_found, 7);
    }

    #[tokio::test]
    async fn test_dequeue_is_fifo_per_queue() {
        let repos = Repos::in_memory();
        let (_, runs) = seed(&repos, 4, "default").await;

        // two batches: r00, r01 then r02, r03
        enqueue_all(&repos, &runs[..2]).await;
        enqueue_all(&repos, &runs[2..]).await;

        for expected in &runs {
            let item = repos.queue.dequeue("default", "w").await.unwrap();
            assert_eq!(item.run.id, expected.id);
        }
        assert!(repos.queue.dequeue("default", "w").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_queue_names_are_isolated() {
        let repos = Repos::in_memory();
        let (_, runs) = seed(&repos, 1, "gpu").await;
        enqueue_all(&repos, &runs).await;

        assert!(repos.queue.dequeue("default", "w").await.unwrap_err().is_not_found());
        assert_eq!(repos.queue.dequeue("gpu", "w").await.unwrap().run.id, runs[0].id);
    }

    #[tokio::test]
    async fn test_dequeue_marks_item_run_and_task_started() {
        let repos = Repos::in_memory();
        let (task, runs) = seed(&repos, 2, "default").await;
        enqueue_all(&repos, &runs).await;

        let item = repos.queue.dequeue("default", "runner-1").await.unwrap();
        assert!(item.running);
        assert_eq!(item.running_on.as_deref(), Some("runner-1"));
        assert!(item.started_at.is_some());
        assert!(item.run.started_at.is_some());
        item.validate_running().unwrap();

        let first_start = repos.tasks.get(task.id).await.unwrap().started_at.unwrap();
        repos.queue.dequeue("default", "runner-2").await.unwrap();
        let task = repos.tasks.get(task.id).await.unwrap();
        assert_eq!(task.started_at, Some(first_start));
    }

    #[tokio::test]
    async fn test_batch_enqueue_is_all_or_nothing() {
        let repos = Repos::in_memory();
        let (_, runs) = seed(&repos, 2, "default").await;

        let batch = vec![
            NewQueueItem::new(runs[0].id, "default"),
            NewQueueItem::new(ResourceId::new(), "default"),
        ];
        assert!(repos.queue.enqueue(batch).await.is_err());
        assert_eq!(repos.queue.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_status_set_exactly_once_and_rolls_up() {
        let repos = Repos::in_memory();
        let (task, runs) = seed(&repos, 2, "default").await;
        enqueue_all(&repos, &runs).await;

        let first = repos.runs.finish(runs[0].id, true).await.unwrap();
        assert_eq!(first.run.status, Some(true));
        assert_eq!(first.task_status, None);
        assert_eq!(repos.queue.count().await.unwrap(), 1);

        let err = repos.runs.finish(runs[0].id, false).await.unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));

        let second = repos.runs.finish(runs[1].id, false).await.unwrap();
        assert_eq!(second.task_status, Some(false));

        let task = repos.tasks.get(task.id).await.unwrap();
        assert_eq!(task.status, Some(false));
        assert!(task.is_finished());
        assert!(!task.canceled);
        assert_eq!(repos.queue.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cancel_is_terminal() {
        let repos = Repos::in_memory();
        let (task, runs) = seed(&repos, 3, "default").await;
        enqueue_all(&repos, &runs).await;
        repos.runs.finish(runs[0].id, true).await.unwrap();

        let canceled = repos.tasks.cancel(task.id).await.unwrap();
        assert_eq!(canceled.len(), 2);
        assert!(canceled.iter().all(|r| r.status == Some(false)));
        assert_eq!(repos.queue.count().await.unwrap(), 0);

        let after = repos.tasks.get(task.id).await.unwrap();
        assert!(after.canceled);
        assert_eq!(after.status, Some(false));

        assert!(matches!(
            repos.tasks.cancel(task.id).await.unwrap_err(),
            DbError::Conflict(_)
        ));
        assert!(matches!(
            repos.runs.finish(runs[1].id, true).await.unwrap_err(),
            DbError::Conflict(_)
        ));
        assert_eq!(repos.tasks.get(task.id).await.unwrap().status, Some(false));
    }

    #[tokio::test]
    async fn test_lookups_for_cancellation() {
        let repos = Repos::in_memory();
        let (task, _) = seed(&repos, 1, "default").await;

        let open = repos
            .tasks
            .open_for_head_ref(task.repository_id, "heads/feature")
            .await
            .unwrap();
        assert_eq!(open.len(), 1);
        assert!(repos
            .tasks
            .open_for_head_ref(task.repository_id, "heads/other")
            .await
            .unwrap()
            .is_empty());

        let open = repos.tasks.open_for_pull_request("erikh/foo", 7).await.unwrap();
        assert_eq!(open.len(), 1);

        repos.tasks.cancel(task.id).await.unwrap();
        assert!(repos
            .tasks
            .open_for_pull_request("erikh/foo", 7)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_submission_counts_and_target() {
        let repos = Repos::in_memory();
        let (task, _) = seed(&repos, 3, "default").await;

        let sub = repos.submissions.get(task.submission_id).await.unwrap();
        assert_eq!(sub.tasks_count, 1);
        assert_eq!(sub.runs_count, 3);

        let target = repos.tasks.target(task.id).await.unwrap();
        assert_eq!(target.repository.name, "erikh/foo");
        assert_eq!(target.sha, SHA);
        assert_eq!(target.owner.unwrap().token, "token");
    }

    #[tokio::test]
    async fn test_refs_are_found_not_duplicated() {
        let repos = Repos::in_memory();
        let (task, _) = seed(&repos, 1, "default").await;

        let again = repos
            .refs
            .find_or_create(NewRef {
                repository_id: task.repository_id,
                ref_name: "heads/other-name".into(),
                sha: SHA.into(),
            })
            .await
            .unwrap();
        assert_eq!(again.ref_name, "heads/feature");

        let bad = NewRef {
            repository_id: task.repository_id,
            ref_name: "heads/x".into(),
            sha: "abc".into(),
        };
        assert!(repos.refs.find_or_create(bad).await.is_err());
    }
}
