//! Scheduler errors.
//!
//! Multi-stage operations wrap failures with the stage that failed, so a
//! caller reads `configuring repositories: obtaining parent repository: not
//! found: repository foo/bar` rather than a bare `not found`.

use ferry_config::ConfigError;
use ferry_core::codehost::CodeHostError;
use ferry_db::DbError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Core(#[from] ferry_core::Error),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    CodeHost(#[from] CodeHostError),

    #[error("{stage}: {source}")]
    Stage {
        stage: String,
        source: Box<SchedulerError>,
    },
}

/// Coarse classification used by callers to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Absent record or empty queue; pollers back off and retry.
    NotFound,
    Invalid,
    Forbidden,
    /// Single-assignment violation or terminal record.
    Conflict,
    Internal,
}

impl SchedulerError {
    /// The innermost error, looking through stage wrappers.
    pub fn root(&self) -> &SchedulerError {
        match self {
            SchedulerError::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        use ferry_core::Error as Core;

        match self.root() {
            SchedulerError::Core(e) | SchedulerError::Db(DbError::Validation(e)) => match e {
                Core::NotFound(_) => ErrorKind::NotFound,
                Core::InvalidInput(_) => ErrorKind::Invalid,
                Core::Forbidden(_) => ErrorKind::Forbidden,
                Core::Conflict(_) => ErrorKind::Conflict,
                Core::Internal(_) => ErrorKind::Internal,
            },
            SchedulerError::Db(e) if e.is_not_found() => ErrorKind::NotFound,
            SchedulerError::Db(DbError::Conflict(_) | DbError::Duplicate(_)) => {
                ErrorKind::Conflict
            }
            SchedulerError::Db(_) => ErrorKind::Internal,
            SchedulerError::Config(_) => ErrorKind::Invalid,
            SchedulerError::CodeHost(e) if e.is_not_found() => ErrorKind::NotFound,
            SchedulerError::CodeHost(CodeHostError::Invalid(_)) => ErrorKind::Invalid,
            SchedulerError::CodeHost(_) => ErrorKind::Internal,
            SchedulerError::Stage { .. } => ErrorKind::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}

pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;

/// Attach the name of the failing stage to an error.
pub trait StageExt<T> {
    fn stage(self, stage: impl Into<String>) -> SchedulerResult<T>;
}

impl<T, E: Into<SchedulerError>> StageExt<T> for std::result::Result<T, E> {
    fn stage(self, stage: impl Into<String>) -> SchedulerResult<T> {
        self.map_err(|e| SchedulerError::Stage {
            stage: stage.into(),
            source: Box::new(e.into()),
        })
    }
}
