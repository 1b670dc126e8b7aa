//! Choosing which task directories a submission runs, and turning them into
//! tasks, runs and queue items.

use crate::error::{SchedulerResult, StageExt};
use crate::submission::RepoContext;
use crate::Scheduler;
use ferry_config::{ConfigError, TASK_FILE, detect_cycle, normalize_dir, parse_task};
use ferry_core::queue::NewQueueItem;
use ferry_core::run::{NewRun, Run, run_name};
use ferry_core::submission::{NewSubmission, Submission};
use ferry_core::task::{NewTask, Task, TaskSettings};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::{debug, info, warn};

/// The records created for a submission, with queue items not yet enqueued.
#[derive(Debug)]
pub struct Picked {
    pub submission: Submission,
    pub tasks: Vec<Task>,
    pub runs: Vec<Run>,
    pub items: Vec<NewQueueItem>,
}

pub struct TaskPicker<'a> {
    scheduler: &'a Scheduler,
}

impl<'a> TaskPicker<'a> {
    pub fn new(scheduler: &'a Scheduler) -> Self {
        Self { scheduler }
    }

    pub async fn pick(&self, ctx: &RepoContext) -> SchedulerResult<Picked> {
        let repos = &self.scheduler.repos;
        let client = ctx.client.as_ref();
        let head = ctx.head_sha();

        let tree = client
            .get_file_list(&ctx.fork.name, head)
            .await
            .stage("listing files")?;
        let taskdirs = task_dirs(&tree, &ctx.repo_config)?;

        let selected = if ctx.is_full_run() {
            taskdirs.clone()
        } else {
            let changed = if ctx.base_sha() == head {
                tree.clone()
            } else {
                client
                    .get_diff_files(&ctx.parent.name, ctx.base_sha(), head)
                    .await
                    .stage("computing diff")?
            };
            select_dirs(&taskdirs, &changed_dirs(&changed)?)
        };

        debug!(
            taskdirs = taskdirs.len(),
            selected = selected.len(),
            full_run = ctx.is_full_run(),
            "selected task directories"
        );

        let submission = repos
            .submissions
            .create(NewSubmission {
                base_ref_id: ctx.parent_ref.id,
                head_ref_id: (ctx.fork_ref.id != ctx.parent_ref.id).then_some(ctx.fork_ref.id),
                submitted_by: ctx.submitter.as_ref().map(|u| u.id),
                ticket_id: ctx.ticket_id,
            })
            .await
            .stage("recording submission")?;

        let declared = match self.load_tasks(ctx, selected).await {
            Ok(declared) => declared,
            Err((dir, e)) => {
                self.report_task_error(ctx, &dir, &e).await;
                return Err(e).stage(format!("parsing task {dir}"));
            }
        };

        let mut tasks = Vec::with_capacity(declared.len());
        let mut runs = Vec::new();
        let mut items = Vec::new();

        for (dir, settings) in declared {
            let task = repos
                .tasks
                .create(NewTask {
                    submission_id: submission.id,
                    repository_id: ctx.parent.id,
                    path: dir.clone(),
                    settings: settings.clone(),
                    pull_request_id: ctx.ticket_id,
                })
                .await
                .stage(format!("creating task {dir}"))?;

            for (name, run_settings) in &settings.runs {
                let new = NewRun {
                    task_id: task.id,
                    name: run_name(&dir, name),
                    settings: run_settings.clone(),
                };
                new.validate().stage(format!("creating run {}", new.name))?;
                let run = repos
                    .runs
                    .create(new)
                    .await
                    .stage(format!("creating run {}", run_name(&dir, name)))?;

                items.push(NewQueueItem::new(run.id, &run.settings.queue));
                self.scheduler
                    .reporter
                    .pending(ctx.client.clone(), &ctx.parent.name, head, &run);
                runs.push(run);
            }

            tasks.push(task);
        }

        info!(
            submission = %submission.id,
            tasks = tasks.len(),
            runs = runs.len(),
            "tasks picked"
        );

        Ok(Picked {
            submission,
            tasks,
            runs,
            items,
        })
    }

    /// Parse the selected directories and every directory they depend on.
    /// The dependency graph is checked for cycles before anything is created.
    async fn load_tasks(
        &self,
        ctx: &RepoContext,
        selected: BTreeSet<String>,
    ) -> Result<BTreeMap<String, TaskSettings>, (String, ConfigError)> {
        let mut pending: VecDeque<String> = selected.iter().cloned().collect();
        let mut seen = selected;
        let mut declared = BTreeMap::new();

        while let Some(dir) = pending.pop_front() {
            let settings = self
                .load_task(ctx, &dir)
                .await
                .map_err(|e| (dir.clone(), e))?;

            for dep in &settings.dependencies {
                if seen.insert(dep.clone()) {
                    debug!(dir = %dir, dependency = %dep, "adding dependency");
                    pending.push_back(dep.clone());
                }
            }

            declared.insert(dir, settings);
        }

        let graph: BTreeMap<String, Vec<String>> = declared
            .iter()
            .map(|(dir, settings)| (dir.clone(), settings.dependencies.clone()))
            .collect();

        if let Err(cycle) = detect_cycle(&graph) {
            let dir = cycle.split(" -> ").next().unwrap_or_default().to_string();
            return Err((dir, ConfigError::CycleDetected(cycle)));
        }

        Ok(declared)
    }

    async fn load_task(&self, ctx: &RepoContext, dir: &str) -> Result<TaskSettings, ConfigError> {
        let path = task_file_path(dir);
        let bytes = ctx
            .client
            .get_file(&ctx.fork.name, ctx.head_sha(), &path)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    ConfigError::InvalidReference(format!("no {TASK_FILE} in {dir:?}"))
                } else {
                    ConfigError::InvalidValue {
                        field: path.clone(),
                        message: e.to_string(),
                    }
                }
            })?;

        parse_task(&String::from_utf8_lossy(&bytes), &ctx.repo_config)
    }

    async fn report_task_error(&self, ctx: &RepoContext, dir: &str, err: &ConfigError) {
        warn!(dir, error = %err, "task declaration rejected");

        let Some(ticket) = ctx.ticket_id else {
            return;
        };

        let text = format!("ferry could not process the task in `{dir}`:\n\n```\n{err}\n```");
        if let Err(e) = ctx.client.comment_error(&ctx.parent.name, ticket, &text).await {
            warn!(repository = %ctx.parent.name, ticket, error = %e, "failed to comment on pull request");
        }
    }
}

fn task_file_path(dir: &str) -> String {
    if dir == "." {
        TASK_FILE.to_string()
    } else {
        format!("{dir}/{TASK_FILE}")
    }
}

/// Repository-relative directory of a file path; `"."` for the root.
fn parent_dir(path: &str) -> Result<String, ConfigError> {
    match path.rsplit_once('/') {
        Some((dir, _)) => normalize_dir(dir),
        None => Ok(".".to_string()),
    }
}

/// Directories holding a task declaration, minus ignored ones.
fn task_dirs(tree: &[String], config: &ferry_config::RepoConfig) -> SchedulerResult<BTreeSet<String>> {
    let mut dirs = BTreeSet::new();
    for path in tree {
        let file = path.rsplit('/').next().unwrap_or(path.as_str());
        if file != TASK_FILE {
            continue;
        }
        let dir = parent_dir(path)?;
        if config.is_ignored(&dir) {
            debug!(dir = %dir, "ignoring task directory");
            continue;
        }
        dirs.insert(dir);
    }
    Ok(dirs)
}

fn changed_dirs(files: &[String]) -> SchedulerResult<BTreeSet<String>> {
    let mut dirs = BTreeSet::new();
    for file in files {
        dirs.insert(parent_dir(file)?);
    }
    Ok(dirs)
}

/// Whether `ancestor` is `dir` or one of its parents, by whole path segments.
fn is_within(dir: &str, ancestor: &str) -> bool {
    ancestor == "."
        || dir == ancestor
        || dir
            .strip_prefix(ancestor)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// The task directories a diff touches.
///
/// A changed directory that declares a task is selected, and so is the
/// nearest task directory strictly above it. The root task always runs.
fn select_dirs(taskdirs: &BTreeSet<String>, changed: &BTreeSet<String>) -> BTreeSet<String> {
    let mut selected = BTreeSet::new();

    if taskdirs.contains(".") {
        selected.insert(".".to_string());
    }

    for dir in changed {
        if taskdirs.contains(dir) {
            selected.insert(dir.clone());
        }

        let enclosing = taskdirs
            .iter()
            .filter(|t| *t != dir && is_within(dir, t))
            .max_by_key(|t| if *t == "." { 0 } else { t.split('/').count() });

        if let Some(t) = enclosing {
            selected.insert(t.clone());
        }
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_select_nearest_enclosing() {
        let taskdirs = set(&[".", "a", "a/b", "c"]);
        assert_eq!(select_dirs(&taskdirs, &set(&["a/b"])), set(&[".", "a", "a/b"]));
        assert_eq!(select_dirs(&taskdirs, &set(&["a/b/x/y"])), set(&[".", "a/b"]));
        assert_eq!(select_dirs(&taskdirs, &set(&["docs"])), set(&["."]));
        assert_eq!(select_dirs(&taskdirs, &set(&["c", "."])), set(&[".", "c"]));
    }

    #[test]
    fn test_select_whole_segments() {
        let taskdirs = set(&["a", "ab"]);
        assert_eq!(select_dirs(&taskdirs, &set(&["ab/x"])), set(&["ab"]));
        assert!(select_dirs(&taskdirs, &set(&["."])).is_empty());
    }

    #[test]
    fn test_task_dirs() {
        let tree: Vec<String> = ["task.kdl", "a/task.kdl", "a/main.go", "vendor/x/task.kdl", "b/task.kdl.bak"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let config = ferry_config::RepoConfig {
            ignore_directories: vec!["vendor".into()],
            ..Default::default()
        };
        assert_eq!(task_dirs(&tree, &config).unwrap(), set(&[".", "a"]));
    }

    #[test]
    fn test_changed_dirs() {
        let files: Vec<String> = ["README.md", "a/b/c.go", "a/d.go"].iter().map(|s| s.to_string()).collect();
        assert_eq!(changed_dirs(&files).unwrap(), set(&[".", "a/b", "a"]));
    }
}
