//! A recording code host and a seeded scheduler for tests.

use crate::{Scheduler, StatusReporter, StatusWorker};
use async_trait::async_trait;
use ferry_config::TASK_FILE;
use ferry_core::codehost::{
    CodeHost, CodeHostError, CodeHostFactory, CodeHostResult, CommitStatus, HostRepository,
};
use ferry_core::repository::{NewRepository, Repository, User};
use ferry_core::submission::SubmissionRequest;
use ferry_db::Repos;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

pub const SHA_BASE: &str = "1111111111111111111111111111111111111111";
pub const SHA_HEAD: &str = "be3d26c478991039e951097f2c99f56b55396941";
pub const SHA_NEXT: &str = "2222222222222222222222222222222222222222";

#[derive(Default)]
struct FakeState {
    repositories: HashMap<String, HostRepository>,
    shas: HashMap<String, String>,
    refs: HashMap<String, Vec<String>>,
    files: BTreeMap<String, Vec<u8>>,
    diff: Vec<String>,
    diffed: Vec<String>,
    statuses: Vec<(String, String, CommitStatus)>,
    comments: Vec<(String, i64, String)>,
    cleared: Vec<(String, String)>,
}

/// Serves one tree for every repository and SHA, and records writes.
#[derive(Default)]
pub struct FakeCodeHost {
    state: Mutex<FakeState>,
}

impl FakeCodeHost {
    pub fn add_repository(&self, repo: HostRepository) {
        let mut state = self.state.lock().unwrap();
        state.repositories.insert(repo.full_name.clone(), repo);
    }

    pub fn add_file(&self, path: &str, content: &str) {
        let mut state = self.state.lock().unwrap();
        state.files.insert(path.to_string(), content.as_bytes().to_vec());
    }

    pub fn add_task(&self, dir: &str, kdl: &str) {
        if dir == "." {
            self.add_file(TASK_FILE, kdl);
        } else {
            self.add_file(&format!("{dir}/{TASK_FILE}"), kdl);
        }
    }

    pub fn set_diff(&self, files: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state.diff = files.iter().map(|f| f.to_string()).collect();
    }

    /// Point `ref_name` at `sha`; `sha` is then named only by `ref_name`.
    pub fn push_head(&self, ref_name: &str, sha: &str) {
        let mut state = self.state.lock().unwrap();
        state.shas.insert(ref_name.to_string(), sha.to_string());
        state.refs.insert(sha.to_string(), vec![ref_name.to_string()]);
    }

    pub fn statuses(&self) -> Vec<(String, String, CommitStatus)> {
        self.state.lock().unwrap().statuses.clone()
    }

    pub fn comments(&self) -> Vec<(String, i64, String)> {
        self.state.lock().unwrap().comments.clone()
    }

    pub fn cleared(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().cleared.clone()
    }

    /// Repositories a diff was requested on, in order.
    pub fn diffed(&self) -> Vec<String> {
        self.state.lock().unwrap().diffed.clone()
    }
}

#[async_trait]
impl CodeHost for FakeCodeHost {
    async fn get_repository(&self, name: &str) -> CodeHostResult<HostRepository> {
        let state = self.state.lock().unwrap();
        state
            .repositories
            .get(name)
            .cloned()
            .ok_or_else(|| CodeHostError::NotFound(format!("repository {name}")))
    }

    async fn get_sha(&self, _repo: &str, ref_name: &str) -> CodeHostResult<String> {
        let state = self.state.lock().unwrap();
        state
            .shas
            .get(ref_name)
            .cloned()
            .ok_or_else(|| CodeHostError::NotFound(format!("ref {ref_name}")))
    }

    async fn get_refs(&self, _repo: &str, sha: &str) -> CodeHostResult<Vec<String>> {
        let state = self.state.lock().unwrap();
        Ok(state.refs.get(sha).cloned().unwrap_or_default())
    }

    async fn get_file_list(&self, _repo: &str, _sha: &str) -> CodeHostResult<Vec<String>> {
        let state = self.state.lock().unwrap();
        let mut files: Vec<String> = state.files.keys().cloned().collect();
        files.extend(state.diff.iter().cloned());
        files.sort();
        files.dedup();
        Ok(files)
    }

    async fn get_file(&self, _repo: &str, _sha: &str, path: &str) -> CodeHostResult<Vec<u8>> {
        let state = self.state.lock().unwrap();
        state
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| CodeHostError::NotFound(format!("file {path}")))
    }

    async fn get_diff_files(
        &self,
        repo: &str,
        _base: &str,
        _head: &str,
    ) -> CodeHostResult<Vec<String>> {
        let mut state = self.state.lock().unwrap();
        state.diffed.push(repo.to_string());
        Ok(state.diff.clone())
    }

    async fn post_status(
        &self,
        repo: &str,
        sha: &str,
        status: &CommitStatus,
    ) -> CodeHostResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .statuses
            .push((repo.to_string(), sha.to_string(), status.clone()));
        Ok(())
    }

    async fn clear_states(&self, repo: &str, sha: &str) -> CodeHostResult<()> {
        let mut state = self.state.lock().unwrap();
        state.cleared.push((repo.to_string(), sha.to_string()));
        Ok(())
    }

    async fn comment_error(
        &self,
        repo: &str,
        pull_request_id: i64,
        text: &str,
    ) -> CodeHostResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .comments
            .push((repo.to_string(), pull_request_id, text.to_string()));
        Ok(())
    }
}

/// Hands out the same fake for every credential and remembers which were used.
pub struct FakeHosts {
    host: Arc<FakeCodeHost>,
    tokens: Mutex<Vec<String>>,
}

impl FakeHosts {
    pub fn tokens(&self) -> Vec<String> {
        self.tokens.lock().unwrap().clone()
    }
}

impl CodeHostFactory for FakeHosts {
    fn for_token(&self, token: &str) -> Arc<dyn CodeHost> {
        self.tokens.lock().unwrap().push(token.to_string());
        self.host.clone()
    }
}

/// A scheduler over `erikh/foo`, owned by `erikh`, with `heads/main` at
/// [`SHA_BASE`] and `heads/feature` at [`SHA_HEAD`].
pub struct Fixture {
    pub scheduler: Scheduler,
    pub host: Arc<FakeCodeHost>,
    pub hosts: Arc<FakeHosts>,
    pub worker: StatusWorker,
    pub user: User,
    pub parent: Repository,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_repos(Repos::in_memory()).await
    }

    pub async fn with_repos(repos: Repos) -> Self {
        let user = repos.users.create("erikh", "token").await.unwrap();
        let parent = repos
            .repositories
            .create(NewRepository {
                name: "erikh/foo".into(),
                private: false,
                disabled: false,
                default_branch: Some("main".into()),
                metadata: serde_json::json!({}),
                owner_id: Some(user.id),
                hook_secret: Some("secret".into()),
            })
            .await
            .unwrap();

        let host = Arc::new(FakeCodeHost::default());
        host.add_repository(HostRepository {
            full_name: "erikh/foo".into(),
            default_branch: Some("main".into()),
            ..Default::default()
        });
        host.push_head("heads/main", SHA_BASE);
        host.push_head("heads/feature", SHA_HEAD);

        let hosts = Arc::new(FakeHosts {
            host: host.clone(),
            tokens: Mutex::new(Vec::new()),
        });
        let (reporter, worker) = StatusReporter::channel(256, "http://ferry.test/");
        let scheduler = Scheduler::new(repos, hosts.clone(), reporter);

        Self {
            scheduler,
            host,
            hosts,
            worker,
            user,
            parent,
        }
    }

    /// A push of `heads/feature` to `erikh/foo`.
    pub fn hook_request(&self) -> SubmissionRequest {
        SubmissionRequest {
            parent: "erikh/foo".into(),
            fork: "erikh/foo".into(),
            head: SHA_HEAD.into(),
            base: SHA_BASE.into(),
            submitted_by: Some("erikh".into()),
            ..Default::default()
        }
    }
}
