//! Persistence layer for ferry.
//!
//! Provides repository traits, PostgreSQL implementations and an in-memory
//! store that implements the same traits.

pub mod error;
pub mod memory;
pub mod repo;

pub use error::{DbError, DbResult};
pub use repo::*;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;

/// Create a new database connection pool.
pub async fn create_pool(database_url: &str) -> DbResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Run database migrations.
pub async fn run_migrations(pool: &PgPool) -> DbResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Every repository the scheduler needs, behind trait objects.
#[derive(Clone)]
pub struct Repos {
    pub users: Arc<dyn UserRepo>,
    pub repositories: Arc<dyn RepositoryRepo>,
    pub refs: Arc<dyn RefRepo>,
    pub submissions: Arc<dyn SubmissionRepo>,
    pub tasks: Arc<dyn TaskRepo>,
    pub runs: Arc<dyn RunRepo>,
    pub queue: Arc<dyn QueueRepo>,
}

impl Repos {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            users: Arc::new(PgUserRepo::new(pool.clone())),
            repositories: Arc::new(PgRepositoryRepo::new(pool.clone())),
            refs: Arc::new(PgRefRepo::new(pool.clone())),
            submissions: Arc::new(PgSubmissionRepo::new(pool.clone())),
            tasks: Arc::new(PgTaskRepo::new(pool.clone())),
            runs: Arc::new(PgRunRepo::new(pool.clone())),
            queue: Arc::new(PgQueueRepo::new(pool)),
        }
    }

    pub fn in_memory() -> Self {
        let store = Arc::new(memory::MemoryStore::new());
        Self {
            users: store.clone(),
            repositories: store.clone(),
            refs: store.clone(),
            submissions: store.clone(),
            tasks: store.clone(),
            runs: store.clone(),
            queue: store,
        }
    }
}
