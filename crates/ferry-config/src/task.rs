//! Task declarations (`task.kdl`).
//!
//! ```kdl
//! mountpoint "/src"
//! dependencies "lib"
//! default-image "golang:1.22"
//! default-timeout 600
//!
//! run "test" {
//!     command "make" "test"
//!     queue "fast"
//! }
//! run "lint" {
//!     command "make" "lint"
//!     resources cpu=1 memory=512
//! }
//! ```
//!
//! Parsing applies the repository configuration cascade before validating, so
//! the returned settings are exactly what gets stored and dispatched.

use crate::node;
use crate::repo::RepoConfig;
use crate::{ConfigError, ConfigResult};
use ferry_core::queue::DEFAULT_QUEUE;
use ferry_core::task::{RunSettings, TaskSettings};
use kdl::{KdlDocument, KdlNode};

/// File name of a task declaration inside a task directory.
pub const TASK_FILE: &str = "task.kdl";

/// Parse a task declaration, apply the repository overrides and validate.
pub fn parse_task(kdl: &str, config: &RepoConfig) -> ConfigResult<TaskSettings> {
    let doc: KdlDocument = kdl.parse()?;
    let mut settings = TaskSettings::default();

    for n in doc.nodes() {
        match node::name(n) {
            "mountpoint" => settings.mountpoint = node::first_string_arg(n)?,
            "workdir" => settings.workdir = node::first_string_arg(n)?,
            "env" => settings.env.extend(node::all_string_args(n)?),
            "dependencies" => {
                for dep in node::all_string_args(n)? {
                    settings.dependencies.push(normalize_dir(&dep)?);
                }
            }
            "default-timeout" => settings.default_timeout_secs = node::u64_arg(n)?,
            "default-queue" => settings.default_queue = node::first_string_arg(n)?,
            "default-image" => settings.default_image = node::first_string_arg(n)?,
            "default-resources" => settings.default_resources = node::resources(n)?,
            "metadata" => settings.metadata = node::string_map(n)?,
            "run" => {
                let run = parse_run(n)?;
                if settings.runs.contains_key(&run.name) {
                    return Err(ConfigError::Duplicate(format!("run {:?}", run.name)));
                }
                settings.runs.insert(run.name.clone(), run);
            }
            other => return Err(ConfigError::UnknownField(other.to_string())),
        }
    }

    apply_overrides(&mut settings, config);

    for run in settings.runs.values() {
        if run.privileged && !config.allow_privileged {
            return Err(ConfigError::PrivilegedDenied(run.name.clone()));
        }
    }

    settings.validate()?;
    Ok(settings)
}

fn parse_run(n: &KdlNode) -> ConfigResult<RunSettings> {
    let name = node::first_string_arg(n)
        .map_err(|_| ConfigError::MissingField("run name".to_string()))?;
    if name.is_empty() {
        return Err(ConfigError::MissingField("run name".to_string()));
    }

    let mut run = RunSettings {
        name,
        ..Default::default()
    };

    if let Some(children) = n.children() {
        for child in children.nodes() {
            match node::name(child) {
                "command" => run.command = node::all_string_args(child)?,
                "image" => run.image = node::first_string_arg(child)?,
                "queue" => run.queue = node::first_string_arg(child)?,
                "timeout" => run.timeout_secs = node::u64_arg(child)?,
                "resources" => run.resources = node::resources(child)?,
                "metadata" => run.metadata = node::string_map(child)?,
                "privileged" => run.privileged = node::bool_arg(child)?,
                other => {
                    return Err(ConfigError::UnknownField(format!("run {:?}: {other}", run.name)));
                }
            }
        }
    }

    Ok(run)
}

/// Fill run fields from the task defaults and the repository configuration.
///
/// Precedence, highest first:
/// - image: run, task default, repository default
/// - timeout: repository global when `override_timeout`; otherwise run, task
///   default, repository global
/// - queue: repository queue when `override_queue`; otherwise run, task
///   default, repository queue, `default`
/// - metadata: run keys win unless `override_metadata`
/// - workdir: task, repository, mountpoint
/// - resources: run, task default, repository default
fn apply_overrides(settings: &mut TaskSettings, config: &RepoConfig) {
    if settings.default_image.is_empty() {
        settings.default_image = config.default_image.clone();
    }
    if settings.workdir.is_empty() {
        settings.workdir = config.workdir.clone();
    }
    if settings.default_resources.is_unset() {
        settings.default_resources = config.default_resources;
    }

    for run in settings.runs.values_mut() {
        if run.image.is_empty() {
            run.image = settings.default_image.clone();
        }

        for (key, value) in &config.metadata {
            if config.override_metadata || !run.metadata.contains_key(key) {
                run.metadata.insert(key.clone(), value.clone());
            }
        }

        if config.override_timeout && config.global_timeout_secs != 0 {
            run.timeout_secs = config.global_timeout_secs;
        } else if run.timeout_secs == 0 {
            run.timeout_secs = if settings.default_timeout_secs != 0 {
                settings.default_timeout_secs
            } else {
                config.global_timeout_secs
            };
        }

        if config.override_queue {
            run.queue = config.queue.clone();
        } else if run.queue.is_empty() {
            run.queue = [settings.default_queue.as_str(), config.queue.as_str()]
                .into_iter()
                .find(|q| !q.is_empty())
                .unwrap_or(DEFAULT_QUEUE)
                .to_string();
        }

        if run.resources.is_unset() {
            run.resources = settings.default_resources;
        }
    }

    if !settings.runs.is_empty() && settings.workdir.is_empty() {
        settings.workdir = settings.mountpoint.clone();
    }
}

/// Normalize a repository-relative directory. The root is `"."`.
pub fn normalize_dir(dir: &str) -> ConfigResult<String> {
    let mut parts = Vec::new();
    for part in dir.trim().split('/') {
        match part {
            "" | "." => {}
            ".." => {
                return Err(ConfigError::InvalidReference(format!(
                    "directory {dir:?} escapes the repository"
                )));
            }
            p => parts.push(p),
        }
    }

    if parts.is_empty() {
        Ok(".".to_string())
    } else {
        Ok(parts.join("/"))
    }
}
