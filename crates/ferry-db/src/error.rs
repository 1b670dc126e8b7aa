//! Database error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    /// A single-assignment field was already set, or a terminal record was
    /// asked to change.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("validation error: {0}")]
    Validation(#[from] ferry_core::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl DbError {
    pub fn is_not_found(&self) -> bool {
        match self {
            DbError::NotFound(_) => true,
            DbError::Validation(ferry_core::Error::NotFound(_)) => true,
            DbError::Database(sqlx::Error::RowNotFound) => true,
            _ => false,
        }
    }

    /// Map a unique-constraint violation to [`DbError::Duplicate`].
    pub(crate) fn from_insert(err: sqlx::Error, what: impl Into<String>) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                DbError::Duplicate(what.into())
            }
            _ => DbError::Database(err),
        }
    }
}

pub type DbResult<T> = std::result::Result<T, DbError>;
