//! Tasks, their lookups for the cancellation cascade, and task cancellation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ferry_core::ResourceId;
use ferry_core::repository::{Repository, User};
use ferry_core::run::Run;
use ferry_core::task::{NewTask, Task, TaskSettings};
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use crate::repo::repository::RepositoryRow;
use crate::repo::run::RunRow;
use crate::repo::user::UserRow;
use crate::{DbError, DbResult};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TaskRow {
    pub id: Uuid,
    pub submission_id: Uuid,
    pub repository_id: Uuid,
    pub path: String,
    pub settings: Json<TaskSettings>,
    pub pull_request_id: Option<i64>,
    pub canceled: bool,
    pub status: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<TaskRow> for Task {
    fn from(row: TaskRow) -> Self {
        Task {
            id: row.id.into(),
            submission_id: row.submission_id.into(),
            repository_id: row.repository_id.into(),
            path: row.path,
            settings: row.settings.0,
            pull_request_id: row.pull_request_id,
            canceled: row.canceled,
            status: row.status,
            created_at: row.created_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
        }
    }
}

/// Where statuses for a task's runs are posted: the parent repository, its
/// owner (whose credential is used) and the SHA under test.
#[derive(Debug, Clone)]
pub struct TaskTarget {
    pub repository: Repository,
    pub owner: Option<User>,
    pub sha: String,
}

#[async_trait]
pub trait TaskRepo: Send + Sync {
    async fn create(&self, new: NewTask) -> DbResult<Task>;
    async fn get(&self, id: ResourceId) -> DbResult<Task>;
    async fn list_for_submission(&self, submission_id: ResourceId) -> DbResult<Vec<Task>>;

    /// Unfinished tasks whose tested ref (head, else base) is `ref_name` in
    /// `repository_id`.
    async fn open_for_head_ref(
        &self,
        repository_id: ResourceId,
        ref_name: &str,
    ) -> DbResult<Vec<Task>>;

    /// Unfinished tasks for a pull request of the named parent repository.
    async fn open_for_pull_request(
        &self,
        repository: &str,
        pull_request_id: i64,
    ) -> DbResult<Vec<Task>>;

    async fn target(&self, id: ResourceId) -> DbResult<TaskTarget>;

    /// Cancel a task atomically: every run without a status is failed and
    /// leaves the queue, then the task is marked canceled and finished.
    /// Returns the runs that were open. Fails with [`DbError::Conflict`] if
    /// the task had already finished.
    async fn cancel(&self, id: ResourceId) -> DbResult<Vec<Run>>;
}

pub struct PgTaskRepo {
    pool: PgPool,
}

impl PgTaskRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskRepo for PgTaskRepo {
    async fn create(&self, new: NewTask) -> DbResult<Task> {
        new.settings.validate()?;

        let row = sqlx::query_as::<_, TaskRow>(
            r#"
            INSERT INTO tasks (id, submission_id, repository_id, path, settings, pull_request_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(new.submission_id.as_uuid())
        .bind(new.repository_id.as_uuid())
        .bind(&new.path)
        .bind(Json(&new.settings))
        .bind(new.pull_request_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn get(&self, id: ResourceId) -> DbResult<Task> {
        let row = sqlx::query_as::<_, TaskRow>("SELECT * FROM tasks WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("task {id}")))?;
        Ok(row.into())
    }

    async fn list_for_submission(&self, submission_id: ResourceId) -> DbResult<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(
            "SELECT * FROM tasks WHERE submission_id = $1 ORDER BY path",
        )
        .bind(submission_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn open_for_head_ref(
        &self,
        repository_id: ResourceId,
        ref_name: &str,
    ) -> DbResult<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT t.* FROM tasks t
            INNER JOIN submissions s ON s.id = t.submission_id
            INNER JOIN refs r ON r.id = COALESCE(s.head_ref_id, s.base_ref_id)
            WHERE r.repository_id = $1 AND r.ref_name = $2
              AND t.status IS NULL AND t.finished_at IS NULL
            ORDER BY t.created_at
            "#,
        )
        .bind(repository_id.as_uuid())
        .bind(ref_name)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn open_for_pull_request(
        &self,
        repository: &str,
        pull_request_id: i64,
    ) -> DbResult<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT t.* FROM tasks t
            INNER JOIN repositories p ON p.id = t.repository_id
            WHERE p.name = $1 AND t.pull_request_id = $2 AND t.finished_at IS NULL
            ORDER BY t.created_at
            "#,
        )
        .bind(repository)
        .bind(pull_request_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn target(&self, id: ResourceId) -> DbResult<TaskTarget> {
        let task = self.get(id).await?;

        let repository: Repository =
            sqlx::query_as::<_, RepositoryRow>("SELECT * FROM repositories WHERE id = $1")
                .bind(task.repository_id.as_uuid())
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| DbError::NotFound(format!("repository {}", task.repository_id)))?
                .into();

        let owner = match repository.owner_id {
            Some(owner_id) => sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = $1")
                .bind(owner_id.as_uuid())
                .fetch_optional(&self.pool)
                .await?
                .map(Into::into),
            None => None,
        };

        let (sha,): (String,) = sqlx::query_as(
            r#"
            SELECT r.sha FROM submissions s
            INNER JOIN refs r ON r.id = COALESCE(s.head_ref_id, s.base_ref_id)
            WHERE s.id = $1
            "#,
        )
        .bind(task.submission_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("submission {}", task.submission_id)))?;

        Ok(TaskTarget {
            repository,
            owner,
            sha,
        })
    }

    async fn cancel(&self, id: ResourceId) -> DbResult<Vec<Run>> {
        let mut tx = self.pool.begin().await?;

        let (finished_at,): (Option<DateTime<Utc>>,) =
            sqlx::query_as("SELECT finished_at FROM tasks WHERE id = $1 FOR UPDATE")
                .bind(id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| DbError::NotFound(format!("task {id}")))?;

        if finished_at.is_some() {
            return Err(DbError::Conflict(format!(
                "task {id} was already finished; cannot cancel"
            )));
        }

        let runs = sqlx::query_as::<_, RunRow>(
            r#"
            UPDATE runs SET status = FALSE, finished_at = NOW()
            WHERE task_id = $1 AND status IS NULL
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query(
            "DELETE FROM queue_items WHERE run_id IN (SELECT id FROM runs WHERE task_id = $1)",
        )
        .bind(id.as_uuid())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE tasks SET canceled = TRUE, status = FALSE, finished_at = NOW() WHERE id = $1",
        )
        .bind(id.as_uuid())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(runs.into_iter().map(Into::into).collect())
    }
}
