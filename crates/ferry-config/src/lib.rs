//! KDL configuration parsing for ferry.
//!
//! This crate handles parsing of:
//! - Task declarations (`task.kdl`), one per task directory
//! - Repository configuration (`ferry.kdl`) and its override cascade
//! - Dependency graph checks across task directories

pub mod error;
pub mod graph;
mod node;
pub mod repo;
pub mod task;

pub use error::{ConfigError, ConfigResult};
pub use graph::detect_cycle;
pub use repo::{REPO_CONFIG_FILE, RepoConfig, parse_repo_config};
pub use task::{TASK_FILE, normalize_dir, parse_task};
