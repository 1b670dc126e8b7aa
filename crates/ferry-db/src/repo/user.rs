//! Users and their stored code-host credentials.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ferry_core::ResourceId;
use ferry_core::repository::User;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{DbError, DbResult};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub username: String,
    pub token: String,
    pub created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id.into(),
            username: row.username,
            token: row.token,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn create(&self, username: &str, token: &str) -> DbResult<User>;
    async fn get(&self, id: ResourceId) -> DbResult<User>;
    async fn get_by_username(&self, username: &str) -> DbResult<User>;
}

pub struct PgUserRepo {
    pool: PgPool,
}

impl PgUserRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepo for PgUserRepo {
    async fn create(&self, username: &str, token: &str) -> DbResult<User> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            INSERT INTO users (id, username, token, created_at)
            VALUES ($1, $2, $3, NOW())
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(username)
        .bind(token)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DbError::from_insert(e, format!("user {username}")))?;
        Ok(row.into())
    }

    async fn get(&self, id: ResourceId) -> DbResult<User> {
        let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("user {id}")))?;
        Ok(row.into())
    }

    async fn get_by_username(&self, username: &str) -> DbResult<User> {
        let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("user {username}")))?;
        Ok(row.into())
    }
}
