//! Submissions and their read-time counters.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ferry_core::ResourceId;
use ferry_core::submission::{NewSubmission, Submission};
use sqlx::PgPool;
use uuid::Uuid;

use crate::repo::git_ref::{PgRefRepo, RefRepo};
use crate::{DbError, DbResult};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SubmissionRow {
    pub id: Uuid,
    pub base_ref_id: Uuid,
    pub head_ref_id: Option<Uuid>,
    pub submitted_by: Option<Uuid>,
    pub ticket_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub tasks_count: i64,
    pub runs_count: i64,
}

#[async_trait]
pub trait SubmissionRepo: Send + Sync {
    async fn create(&self, new: NewSubmission) -> DbResult<Submission>;
    /// Fetch a submission with `tasks_count` and `runs_count` filled in.
    async fn get(&self, id: ResourceId) -> DbResult<Submission>;
}

pub struct PgSubmissionRepo {
    pool: PgPool,
    refs: PgRefRepo,
}

impl PgSubmissionRepo {
    pub fn new(pool: PgPool) -> Self {
        Self {
            refs: PgRefRepo::new(pool.clone()),
            pool,
        }
    }
}

#[async_trait]
impl SubmissionRepo for PgSubmissionRepo {
    async fn create(&self, new: NewSubmission) -> DbResult<Submission> {
        let id = Uuid::now_v7();
        sqlx::query(
            r#"
            INSERT INTO submissions (id, base_ref_id, head_ref_id, submitted_by, ticket_id, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            "#,
        )
        .bind(id)
        .bind(new.base_ref_id.as_uuid())
        .bind(new.head_ref_id.map(Uuid::from))
        .bind(new.submitted_by.map(Uuid::from))
        .bind(new.ticket_id)
        .execute(&self.pool)
        .await?;

        self.get(id.into()).await
    }

    async fn get(&self, id: ResourceId) -> DbResult<Submission> {
        let row = sqlx::query_as::<_, SubmissionRow>(
            r#"
            SELECT s.*,
                (SELECT COUNT(*) FROM tasks t WHERE t.submission_id = s.id) AS tasks_count,
                (SELECT COUNT(*) FROM runs r
                    INNER JOIN tasks t ON t.id = r.task_id
                    WHERE t.submission_id = s.id) AS runs_count
            FROM submissions s
            WHERE s.id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("submission {id}")))?;

        let base_ref = self.refs.get(row.base_ref_id.into()).await?;
        let head_ref = match row.head_ref_id {
            Some(head) => Some(self.refs.get(head.into()).await?),
            None => None,
        };

        Ok(Submission {
            id: row.id.into(),
            base_ref,
            head_ref,
            submitted_by: row.submitted_by.map(Into::into),
            ticket_id: row.ticket_id,
            created_at: row.created_at,
            tasks_count: row.tasks_count,
            runs_count: row.runs_count,
        })
    }
}
