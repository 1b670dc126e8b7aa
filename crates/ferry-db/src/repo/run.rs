//! Runs and the single-assignment status transition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ferry_core::ResourceId;
use ferry_core::run::{NewRun, Run, RunCompletion};
use ferry_core::task::RunSettings;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::{DbError, DbResult};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RunRow {
    pub id: Uuid,
    pub task_id: Uuid,
    pub name: String,
    pub settings: Json<RunSettings>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: Option<bool>,
}

impl From<RunRow> for Run {
    fn from(row: RunRow) -> Self {
        Run {
            id: row.id.into(),
            task_id: row.task_id.into(),
            name: row.name,
            settings: row.settings.0,
            created_at: row.created_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
            status: row.status,
        }
    }
}

#[async_trait]
pub trait RunRepo: Send + Sync {
    async fn create(&self, new: NewRun) -> DbResult<Run>;
    async fn get(&self, id: ResourceId) -> DbResult<Run>;
    async fn list_for_task(&self, task_id: ResourceId) -> DbResult<Vec<Run>>;

    /// Record a run's terminal status, atomically:
    /// - fails with [`DbError::Conflict`] if the status was already set
    /// - removes the run's queue item, if it still has one
    /// - finishes the task with the AND of all run statuses once no run is open
    async fn finish(&self, id: ResourceId, status: bool) -> DbResult<RunCompletion>;
}

pub struct PgRunRepo {
    pool: PgPool,
}

impl PgRunRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Lock the task row owning `run_id`. Every writer touching a task's runs
/// takes this lock first so finish and cancel serialize per task.
async fn lock_task_for_run(
    tx: &mut Transaction<'_, Postgres>,
    run_id: ResourceId,
) -> DbResult<(Uuid, Option<DateTime<Utc>>)> {
    sqlx::query_as::<_, (Uuid, Option<DateTime<Utc>>)>(
        r#"
        SELECT t.id, t.finished_at FROM tasks t
        INNER JOIN runs r ON r.task_id = t.id
        WHERE r.id = $1
        FOR UPDATE OF t
        "#,
    )
    .bind(run_id.as_uuid())
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| DbError::NotFound(format!("run {run_id}")))
}

#[async_trait]
impl RunRepo for PgRunRepo {
    async fn create(&self, new: NewRun) -> DbResult<Run> {
        new.validate()?;

        let row = sqlx::query_as::<_, RunRow>(
            r#"
            INSERT INTO runs (id, task_id, name, settings, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(new.task_id.as_uuid())
        .bind(&new.name)
        .bind(Json(&new.settings))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn get(&self, id: ResourceId) -> DbResult<Run> {
        let row = sqlx::query_as::<_, RunRow>("SELECT * FROM runs WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("run {id}")))?;
        Ok(row.into())
    }

    async fn list_for_task(&self, task_id: ResourceId) -> DbResult<Vec<Run>> {
        let rows = sqlx::query_as::<_, RunRow>(
            "SELECT * FROM runs WHERE task_id = $1 ORDER BY name",
        )
        .bind(task_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn finish(&self, id: ResourceId, status: bool) -> DbResult<RunCompletion> {
        let mut tx = self.pool.begin().await?;

        let (task_id, task_finished_at) = lock_task_for_run(&mut tx, id).await?;

        let run: Run = sqlx::query_as::<_, RunRow>(
            r#"
            UPDATE runs SET status = $2, finished_at = NOW()
            WHERE id = $1 AND status IS NULL
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .bind(status)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| DbError::Conflict(format!("status already set for run {id}")))?
        .into();

        sqlx::query("DELETE FROM queue_items WHERE run_id = $1")
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await?;

        let mut task_status = None;
        if task_finished_at.is_none() {
            let (open, all_passed): (i64, Option<bool>) = sqlx::query_as(
                r#"
                SELECT COUNT(*) FILTER (WHERE status IS NULL), BOOL_AND(status)
                FROM runs WHERE task_id = $1
                "#,
            )
            .bind(task_id)
            .fetch_one(&mut *tx)
            .await?;

            if open == 0 {
                let rolled_up = all_passed.unwrap_or(true);
                sqlx::query("UPDATE tasks SET status = $2, finished_at = NOW() WHERE id = $1")
                    .bind(task_id)
                    .bind(rolled_up)
                    .execute(&mut *tx)
                    .await?;
                task_status = Some(rolled_up);
            }
        }

        tx.commit().await?;
        Ok(RunCompletion { run, task_status })
    }
}
