//! Refs: `(repository, ref_name, sha)` triples.

use async_trait::async_trait;
use ferry_core::ResourceId;
use ferry_core::git::{NewRef, Ref};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{DbError, DbResult};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RefRow {
    pub id: Uuid,
    pub repository_id: Uuid,
    pub ref_name: String,
    pub sha: String,
}

impl From<RefRow> for Ref {
    fn from(row: RefRow) -> Self {
        Ref {
            id: row.id.into(),
            repository_id: row.repository_id.into(),
            ref_name: row.ref_name,
            sha: row.sha,
        }
    }
}

/// Refs are append-only: never updated, never deleted by ferry.
#[async_trait]
pub trait RefRepo: Send + Sync {
    async fn get(&self, id: ResourceId) -> DbResult<Ref>;
    async fn get_by_sha(&self, repository_id: ResourceId, sha: &str) -> DbResult<Ref>;
    /// Insert the ref, or return the existing one for the same repository and SHA.
    async fn find_or_create(&self, new: NewRef) -> DbResult<Ref>;
}

pub struct PgRefRepo {
    pool: PgPool,
}

impl PgRefRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RefRepo for PgRefRepo {
    async fn get(&self, id: ResourceId) -> DbResult<Ref> {
        let row = sqlx::query_as::<_, RefRow>("SELECT * FROM refs WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("ref {id}")))?;
        Ok(row.into())
    }

    async fn get_by_sha(&self, repository_id: ResourceId, sha: &str) -> DbResult<Ref> {
        let row = sqlx::query_as::<_, RefRow>(
            "SELECT * FROM refs WHERE repository_id = $1 AND sha = $2",
        )
        .bind(repository_id.as_uuid())
        .bind(sha)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("ref {sha} in repository {repository_id}")))?;
        Ok(row.into())
    }

    async fn find_or_create(&self, new: NewRef) -> DbResult<Ref> {
        new.validate()?;

        sqlx::query(
            r#"
            INSERT INTO refs (id, repository_id, ref_name, sha)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (repository_id, sha) DO NOTHING
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(new.repository_id.as_uuid())
        .bind(&new.ref_name)
        .bind(&new.sha)
        .execute(&self.pool)
        .await?;

        self.get_by_sha(new.repository_id, &new.sha).await
    }
}
