//! The queue store: FIFO claimable items per queue name.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ferry_core::ResourceId;
use ferry_core::pagination::Page;
use ferry_core::queue::{NewQueueItem, QueueItem};
use ferry_core::run::Run;
use sqlx::PgPool;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use crate::repo::run::RunRow;
use crate::{DbError, DbResult};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct QueueItemRow {
    pub id: Uuid,
    pub position: i64,
    pub run_id: Uuid,
    pub queue_name: String,
    pub running: bool,
    pub running_on: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
}

impl QueueItemRow {
    fn into_item(self, run: Run) -> QueueItem {
        QueueItem {
            id: self.id.into(),
            run,
            running: self.running,
            running_on: self.running_on,
            started_at: self.started_at,
            queue_name: self.queue_name,
        }
    }
}

#[async_trait]
pub trait QueueRepo: Send + Sync {
    /// Insert a batch of items for existing runs. All or nothing.
    async fn enqueue(&self, items: Vec<NewQueueItem>) -> DbResult<Vec<QueueItem>>;

    /// Claim the oldest unclaimed item of `queue_name` for `running_on`, and
    /// stamp `started_at` on the item, its run and (first time only) its task.
    /// Concurrent callers never receive the same item. Fails with
    /// [`DbError::NotFound`] when nothing is waiting.
    async fn dequeue(&self, queue_name: &str, running_on: &str) -> DbResult<QueueItem>;

    async fn list(&self, page: Page) -> DbResult<Vec<QueueItem>>;
    async fn list_for_repository(
        &self,
        repository_id: ResourceId,
        page: Page,
    ) -> DbResult<Vec<QueueItem>>;
    async fn count(&self) -> DbResult<i64>;
    async fn count_for_repository(&self, repository_id: ResourceId) -> DbResult<i64>;
}

pub struct PgQueueRepo {
    pool: PgPool,
}

impl PgQueueRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn with_runs(&self, rows: Vec<QueueItemRow>) -> DbResult<Vec<QueueItem>> {
        let ids: Vec<Uuid> = rows.iter().map(|r| r.run_id).collect();
        let mut runs: HashMap<Uuid, Run> =
            sqlx::query_as::<_, RunRow>("SELECT * FROM runs WHERE id = ANY($1)")
                .bind(&ids)
                .fetch_all(&self.pool)
                .await?
                .into_iter()
                .map(|row| (row.id, row.into()))
                .collect();

        rows.into_iter()
            .map(|row| {
                let run = runs
                    .remove(&row.run_id)
                    .ok_or_else(|| DbError::InvalidData(format!("queue item {} has no run", row.id)))?;
                Ok(row.into_item(run))
            })
            .collect()
    }
}

#[async_trait]
impl QueueRepo for PgQueueRepo {
    async fn enqueue(&self, items: Vec<NewQueueItem>) -> DbResult<Vec<QueueItem>> {
        let mut tx = self.pool.begin().await?;
        let mut out = Vec::with_capacity(items.len());

        for item in items {
            if item.queue_name.is_empty() {
                return Err(DbError::Validation(ferry_core::Error::invalid(
                    "queue name was empty",
                )));
            }

            let row = sqlx::query_as::<_, QueueItemRow>(
                r#"
                INSERT INTO queue_items (id, run_id, queue_name, running)
                VALUES ($1, $2, $3, FALSE)
                RETURNING *
                "#,
            )
            .bind(Uuid::now_v7())
            .bind(item.run_id.as_uuid())
            .bind(&item.queue_name)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| DbError::from_insert(e, format!("queue item for run {}", item.run_id)))?;

            let run: Run = sqlx::query_as::<_, RunRow>("SELECT * FROM runs WHERE id = $1")
                .bind(item.run_id.as_uuid())
                .fetch_one(&mut *tx)
                .await?
                .into();

            out.push(row.into_item(run));
        }

        tx.commit().await?;
        Ok(out)
    }

    async fn dequeue(&self, queue_name: &str, running_on: &str) -> DbResult<QueueItem> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, QueueItemRow>(
            r#"
            UPDATE queue_items
            SET running = TRUE, running_on = $2, started_at = NOW()
            WHERE id = (
                SELECT id FROM queue_items
                WHERE queue_name = $1 AND NOT running
                ORDER BY position
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(queue_name)
        .bind(running_on)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("no queue items waiting on {queue_name}")))?;

        let run: Run = sqlx::query_as::<_, RunRow>(
            "UPDATE runs SET started_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(row.run_id)
        .fetch_one(&mut *tx)
        .await?
        .into();

        sqlx::query("UPDATE tasks SET started_at = COALESCE(started_at, NOW()) WHERE id = $1")
            .bind(run.task_id.as_uuid())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        debug!(queue = queue_name, run = %run.id, running_on, "claimed queue item");
        Ok(row.into_item(run))
    }

    async fn list(&self, page: Page) -> DbResult<Vec<QueueItem>> {
        let rows = sqlx::query_as::<_, QueueItemRow>(
            "SELECT * FROM queue_items ORDER BY position LIMIT $1 OFFSET $2",
        )
        .bind(page.per_page)
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;
        self.with_runs(rows).await
    }

    async fn list_for_repository(
        &self,
        repository_id: ResourceId,
        page: Page,
    ) -> DbResult<Vec<QueueItem>> {
        let rows = sqlx::query_as::<_, QueueItemRow>(
            r#"
            SELECT q.* FROM queue_items q
            INNER JOIN runs r ON r.id = q.run_id
            INNER JOIN tasks t ON t.id = r.task_id
            WHERE t.repository_id = $1
            ORDER BY q.position
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(repository_id.as_uuid())
        .bind(page.per_page)
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;
        self.with_runs(rows).await
    }

    async fn count(&self) -> DbResult<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM queue_items")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn count_for_repository(&self, repository_id: ResourceId) -> DbResult<i64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM queue_items q
            INNER JOIN runs r ON r.id = q.run_id
            INNER JOIN tasks t ON t.id = r.task_id
            WHERE t.repository_id = $1
            "#,
        )
        .bind(repository_id.as_uuid())
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}
