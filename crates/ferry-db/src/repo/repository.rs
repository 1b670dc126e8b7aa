//! Source repositories known to ferry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ferry_core::ResourceId;
use ferry_core::repository::{NewRepository, Repository};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{DbError, DbResult};

/// Database row for repositories.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RepositoryRow {
    pub id: Uuid,
    pub name: String,
    pub private: bool,
    pub disabled: bool,
    pub default_branch: Option<String>,
    pub metadata: serde_json::Value,
    pub owner_id: Option<Uuid>,
    pub hook_secret: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<RepositoryRow> for Repository {
    fn from(row: RepositoryRow) -> Self {
        Repository {
            id: row.id.into(),
            name: row.name,
            private: row.private,
            disabled: row.disabled,
            default_branch: row.default_branch,
            metadata: row.metadata,
            owner_id: row.owner_id.map(Into::into),
            hook_secret: row.hook_secret,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
pub trait RepositoryRepo: Send + Sync {
    async fn create(&self, repo: NewRepository) -> DbResult<Repository>;
    async fn get(&self, id: ResourceId) -> DbResult<Repository>;
    async fn get_by_name(&self, name: &str) -> DbResult<Repository>;
}

pub struct PgRepositoryRepo {
    pool: PgPool,
}

impl PgRepositoryRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RepositoryRepo for PgRepositoryRepo {
    async fn create(&self, repo: NewRepository) -> DbResult<Repository> {
        ferry_core::repository::owner_repo(&repo.name)?;

        let row = sqlx::query_as::<_, RepositoryRow>(
            r#"
            INSERT INTO repositories
                (id, name, private, disabled, default_branch, metadata, owner_id, hook_secret, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(&repo.name)
        .bind(repo.private)
        .bind(repo.disabled)
        .bind(&repo.default_branch)
        .bind(&repo.metadata)
        .bind(repo.owner_id.map(Uuid::from))
        .bind(if repo.disabled { None } else { repo.hook_secret.as_deref() })
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DbError::from_insert(e, format!("repository {}", repo.name)))?;
        Ok(row.into())
    }

    async fn get(&self, id: ResourceId) -> DbResult<Repository> {
        let row = sqlx::query_as::<_, RepositoryRow>("SELECT * FROM repositories WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("repository {id}")))?;
        Ok(row.into())
    }

    async fn get_by_name(&self, name: &str) -> DbResult<Repository> {
        let row = sqlx::query_as::<_, RepositoryRow>("SELECT * FROM repositories WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("repository {name}")))?;
        Ok(row.into())
    }
}
