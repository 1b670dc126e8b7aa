//! Core domain types and traits for the ferry CI dispatcher.
//!
//! This crate contains:
//! - Resource identifiers and the core error type
//! - Repositories, users and refs
//! - Submissions, tasks, runs and queue items
//! - The code-host capability trait consumed by the scheduler
//! - Pagination rules shared by every listing operation

pub mod codehost;
pub mod error;
pub mod git;
pub mod id;
pub mod pagination;
pub mod queue;
pub mod repository;
pub mod run;
pub mod submission;
pub mod task;

pub use error::{Error, Result};
pub use id::ResourceId;
