//! Resolving a submission request into the repositories, refs, credentials
//! and configuration every later stage needs.

use crate::error::{SchedulerResult, StageExt};
use crate::Scheduler;
use ferry_config::{REPO_CONFIG_FILE, RepoConfig, parse_repo_config};
use ferry_core::codehost::{CodeHost, HostRepository};
use ferry_core::git::{NewRef, Ref, ZERO_SHA, is_sha};
use ferry_core::repository::{NewRepository, Repository, User, main_branch_ref};
use ferry_core::submission::SubmissionRequest;
use ferry_core::Error;
use ferry_db::DbError;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything resolved for one submission. Built once by
/// [`SubmissionProcessor::process`] and only read afterwards.
pub struct RepoContext {
    pub request: SubmissionRequest,
    pub parent: Repository,
    pub fork: Repository,
    pub host_parent: HostRepository,
    /// Bound to the parent owner's credential.
    pub client: Arc<dyn CodeHost>,
    pub parent_ref: Ref,
    pub fork_ref: Ref,
    pub submitter: Option<User>,
    pub repo_config: RepoConfig,
    pub ticket_id: Option<i64>,
    /// The parent's main branch in `heads/<branch>` form.
    pub main_branch: String,
}

impl RepoContext {
    pub fn head_sha(&self) -> &str {
        &self.fork_ref.sha
    }

    pub fn base_sha(&self) -> &str {
        &self.parent_ref.sha
    }

    /// Post-merge pushes and forced manual runs test every task directory.
    pub fn is_full_run(&self) -> bool {
        (self.request.all && self.request.manual)
            || (self.fork.id == self.parent.id && self.fork_ref.ref_name == self.main_branch)
    }
}

pub struct SubmissionProcessor<'a> {
    scheduler: &'a Scheduler,
}

impl<'a> SubmissionProcessor<'a> {
    pub fn new(scheduler: &'a Scheduler) -> Self {
        Self { scheduler }
    }

    pub async fn process(&self, request: SubmissionRequest) -> SchedulerResult<RepoContext> {
        let mut request = request.validated().stage("validating submission")?;
        let repos = &self.scheduler.repos;

        let mut submitter = None;
        if request.manual {
            let (user, parent) = self
                .manual_parent(&request)
                .await
                .stage("resolving manual submission")?;
            request.parent = parent;
            submitter = Some(user);
        } else if let Some(username) = request.submitted_by.as_deref() {
            submitter = match repos.users.get_by_username(username).await {
                Ok(user) => Some(user),
                Err(e) if e.is_not_found() => {
                    debug!(username, "submitter is not a ferry user");
                    None
                }
                Err(e) => return Err(e).stage("resolving submitter"),
            };
        }

        let parent = repos
            .repositories
            .get_by_name(&request.parent)
            .await
            .stage("obtaining parent repository")
            .stage("configuring repositories")?;

        if parent.disabled {
            return Err(Error::Forbidden(format!("repository {} is disabled", parent.name)))
                .stage("configuring repositories");
        }

        let client = self
            .scheduler
            .owner_client(&parent)
            .await
            .stage("obtaining owner client")?;

        let host_parent = client
            .get_repository(&parent.name)
            .await
            .stage("reading parent repository from code host")?;

        let main_branch = main_branch_ref(
            host_parent
                .default_branch
                .as_deref()
                .or(parent.default_branch.as_deref()),
        );

        let (fork, fork_main_branch) = if request.fork == parent.name {
            (parent.clone(), main_branch.clone())
        } else {
            let fork = self
                .fork_repository(client.as_ref(), &request.fork, &parent)
                .await
                .stage("obtaining fork repository")
                .stage("configuring repositories")?;
            let branch = main_branch_ref(fork.default_branch.as_deref());
            (fork, branch)
        };

        let head_sha = resolve_sha(client.as_ref(), &fork.name, &request.head)
            .await
            .stage("resolving head")?;

        let base_sha = if request.base.is_empty() {
            client
                .get_sha(&parent.name, &main_branch)
                .await
                .stage("resolving base from main branch")?
        } else {
            resolve_sha(client.as_ref(), &parent.name, &request.base)
                .await
                .stage("resolving base")?
        };

        let base_sha = if base_sha == ZERO_SHA {
            if fork.id != parent.id {
                return Err(Error::invalid(
                    "base is the zero SHA but the change comes from a fork",
                ))
                .stage("resolving base");
            }
            head_sha.clone()
        } else {
            base_sha
        };

        let fork_ref = self
            .manage_ref(client.as_ref(), &fork, &head_sha)
            .await
            .stage("managing head ref")?;
        let parent_ref = self
            .manage_ref(client.as_ref(), &parent, &base_sha)
            .await
            .stage("managing base ref")?;

        let repo_config = load_repo_config(client.as_ref(), &parent.name, &main_branch)
            .await
            .stage("loading repository configuration")?;

        if let Err(e) = self
            .scheduler
            .cancel_ref(fork.id, &fork_ref.ref_name, &fork_main_branch)
            .await
        {
            warn!(
                repository = %fork.name,
                ref_name = %fork_ref.ref_name,
                error = %e,
                "failed to cancel superseded tasks"
            );
        }

        if let Err(e) = client.clear_states(&parent.name, &head_sha).await {
            warn!(repository = %parent.name, sha = %head_sha, error = %e, "failed to clear stale statuses");
        }

        info!(
            parent = %parent.name,
            fork = %fork.name,
            head = %fork_ref.sha,
            base = %parent_ref.sha,
            ref_name = %fork_ref.ref_name,
            "submission resolved"
        );

        let ticket_id = request.pull_request_id;
        Ok(RepoContext {
            request,
            parent,
            fork,
            host_parent,
            client,
            parent_ref,
            fork_ref,
            submitter,
            repo_config,
            ticket_id,
            main_branch,
        })
    }

    /// Manual runs read the fork with the submitting user's own credential,
    /// so nobody can trigger work on a repository they cannot see. The fork is
    /// tested as its own parent when it is enabled in ferry; otherwise its
    /// upstream is.
    async fn manual_parent(&self, request: &SubmissionRequest) -> SchedulerResult<(User, String)> {
        let username = request
            .submitted_by
            .as_deref()
            .ok_or_else(|| Error::invalid("manual submissions require a submitting user"))?;

        let user = self.scheduler.repos.users.get_by_username(username).await?;
        let user_client = self.scheduler.hosts.for_token(&user.token);
        let host_fork = user_client.get_repository(&request.fork).await?;

        let enabled = match self
            .scheduler
            .repos
            .repositories
            .get_by_name(&request.fork)
            .await
        {
            Ok(repo) => !repo.disabled,
            Err(e) if e.is_not_found() => false,
            Err(e) => return Err(e.into()),
        };

        let parent = if enabled {
            request.fork.clone()
        } else {
            host_fork.parent.unwrap_or_else(|| request.fork.clone())
        };

        Ok((user, parent))
    }

    /// Look the fork up, registering it from the code host when ferry has not
    /// seen it yet. Registered forks are disabled and share the parent's owner.
    async fn fork_repository(
        &self,
        client: &dyn CodeHost,
        name: &str,
        parent: &Repository,
    ) -> SchedulerResult<Repository> {
        let repositories = &self.scheduler.repos.repositories;

        match repositories.get_by_name(name).await {
            Ok(repo) => return Ok(repo),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        let host = client.get_repository(name).await?;
        let new = NewRepository {
            name: name.to_string(),
            private: host.private,
            disabled: true,
            default_branch: host.default_branch,
            metadata: host.metadata,
            owner_id: parent.owner_id,
            hook_secret: None,
        };

        match repositories.create(new).await {
            Ok(repo) => {
                info!(repository = %repo.name, parent = %parent.name, "registered fork");
                Ok(repo)
            }
            // another submission registered it first
            Err(DbError::Duplicate(_)) => Ok(repositories.get_by_name(name).await?),
            Err(e) => Err(e.into()),
        }
    }

    /// Find the ref for `sha`, naming new ones after the first branch or tag
    /// that points at it, or the SHA itself when none does.
    async fn manage_ref(
        &self,
        client: &dyn CodeHost,
        repository: &Repository,
        sha: &str,
    ) -> SchedulerResult<Ref> {
        let refs = &self.scheduler.repos.refs;

        match refs.get_by_sha(repository.id, sha).await {
            Ok(r) => return Ok(r),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        let mut names = client.get_refs(&repository.name, sha).await?;
        names.sort();
        let ref_name = names.into_iter().next().unwrap_or_else(|| sha.to_string());

        let new = NewRef {
            repository_id: repository.id,
            ref_name,
            sha: sha.to_string(),
        };
        new.validate()?;
        Ok(refs.find_or_create(new).await?)
    }
}

async fn resolve_sha(client: &dyn CodeHost, repository: &str, head: &str) -> SchedulerResult<String> {
    if is_sha(head) {
        return Ok(head.trim().to_string());
    }
    Ok(client.get_sha(repository, head).await?)
}

async fn load_repo_config(
    client: &dyn CodeHost,
    repository: &str,
    main_branch: &str,
) -> SchedulerResult<RepoConfig> {
    match client
        .get_file(repository, &format!("refs/{main_branch}"), REPO_CONFIG_FILE)
        .await
    {
        Ok(bytes) => Ok(parse_repo_config(&String::from_utf8_lossy(&bytes))?),
        Err(e) if e.is_not_found() => {
            debug!(repository, "no repository configuration; using defaults");
            Ok(RepoConfig::default())
        }
        Err(e) => Err(e.into()),
    }
}
