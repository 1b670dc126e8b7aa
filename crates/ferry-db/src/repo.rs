//! Repository traits and their PostgreSQL implementations.

pub mod git_ref;
pub mod queue;
pub mod repository;
pub mod run;
pub mod submission;
pub mod task;
pub mod user;

pub use git_ref::{PgRefRepo, RefRepo};
pub use queue::{PgQueueRepo, QueueRepo};
pub use repository::{PgRepositoryRepo, RepositoryRepo};
pub use run::{PgRunRepo, RunRepo};
pub use submission::{PgSubmissionRepo, SubmissionRepo};
pub use task::{PgTaskRepo, TaskRepo, TaskTarget};
pub use user::{PgUserRepo, UserRepo};
