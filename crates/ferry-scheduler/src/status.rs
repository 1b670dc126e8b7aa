//! Fire-and-forget commit status reporting.
//!
//! State transitions never wait on the code host. Callers hand a
//! [`StatusReporter`] a notification and move on; a [`StatusWorker`] posts
//! them in the background and logs failures.

use ferry_core::ResourceId;
use ferry_core::codehost::{CodeHost, CommitStatus};
use ferry_core::run::Run;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Status context for failures that belong to no single run.
pub const GLOBAL_CONTEXT: &str = "*global*";

/// One status post waiting for delivery.
pub struct Notification {
    pub client: Arc<dyn CodeHost>,
    pub repository: String,
    pub sha: String,
    pub status: CommitStatus,
}

#[derive(Clone)]
pub struct StatusReporter {
    tx: mpsc::Sender<Notification>,
    public_url: String,
}

impl StatusReporter {
    /// Create a reporter and the worker draining it. At most `buffer`
    /// notifications wait at once; further ones are dropped with a warning.
    pub fn channel(buffer: usize, public_url: impl Into<String>) -> (Self, StatusWorker) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let reporter = Self {
            tx,
            public_url: public_url.into().trim_end_matches('/').to_string(),
        };
        (reporter, StatusWorker { rx })
    }

    /// Link attached to every status for a run.
    pub fn target_url(&self, run_id: ResourceId) -> String {
        format!("{}/log/{}", self.public_url, run_id)
    }

    pub fn pending(&self, client: Arc<dyn CodeHost>, repository: &str, sha: &str, run: &Run) {
        let status = CommitStatus::pending(&run.name, &self.target_url(run.id));
        self.send(client, repository, sha, status);
    }

    pub fn started(&self, client: Arc<dyn CodeHost>, repository: &str, sha: &str, run: &Run) {
        let status = CommitStatus::started(&run.name, &self.target_url(run.id));
        self.send(client, repository, sha, status);
    }

    pub fn errored(
        &self,
        client: Arc<dyn CodeHost>,
        repository: &str,
        sha: &str,
        run: &Run,
        message: &str,
    ) {
        let status = CommitStatus::error(&run.name, &self.target_url(run.id), message);
        self.send(client, repository, sha, status);
    }

    pub fn finished(
        &self,
        client: Arc<dyn CodeHost>,
        repository: &str,
        sha: &str,
        run: &Run,
        success: bool,
        message: &str,
    ) {
        let status = CommitStatus::finished(&run.name, &self.target_url(run.id), success, message);
        self.send(client, repository, sha, status);
    }

    /// A failing [`GLOBAL_CONTEXT`] status for a submission that resolved its
    /// repositories but could not start.
    pub fn start_failed(
        &self,
        client: Arc<dyn CodeHost>,
        repository: &str,
        sha: &str,
        message: &str,
    ) {
        let status = CommitStatus::finished(
            GLOBAL_CONTEXT,
            &self.public_url,
            false,
            &format!("failed to start job: {message}"),
        );
        self.send(client, repository, sha, status);
    }

    fn send(&self, client: Arc<dyn CodeHost>, repository: &str, sha: &str, status: CommitStatus) {
        let notification = Notification {
            client,
            repository: repository.to_string(),
            sha: sha.to_string(),
            status,
        };

        if let Err(e) = self.tx.try_send(notification) {
            let dropped = match &e {
                mpsc::error::TrySendError::Full(n) | mpsc::error::TrySendError::Closed(n) => n,
            };
            warn!(
                repository = %dropped.repository,
                sha = %dropped.sha,
                context = %dropped.status.context,
                error = %e,
                "dropping status notification"
            );
        }
    }
}

/// Delivers notifications in order, one at a time.
pub struct StatusWorker {
    rx: mpsc::Receiver<Notification>,
}

impl StatusWorker {
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Deliver until every [`StatusReporter`] has been dropped.
    pub async fn run(mut self) {
        while let Some(notification) = self.rx.recv().await {
            deliver(notification).await;
        }
        debug!("status worker stopped");
    }

    /// Deliver whatever is already queued and return how many were handled.
    pub async fn drain(&mut self) -> usize {
        let mut delivered = 0;
        while let Ok(notification) = self.rx.try_recv() {
            deliver(notification).await;
            delivered += 1;
        }
        delivered
    }
}

async fn deliver(n: Notification) {
    if let Err(e) = n.client.post_status(&n.repository, &n.sha, &n.status).await {
        error!(
            repository = %n.repository,
            sha = %n.sha,
            context = %n.status.context,
            state = n.status.state.as_str(),
            error = %e,
            "failed to post commit status"
        );
    }
}
