use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::sync::RwLock;

use crate::clients::git::GitOps;
use crate::clients::git::RepoRoot;
use crate::clients::github::GithubOps;
use crate::config::Config;
use crate::config::VarLookup;
use crate::error::SubmitError;

/// Default time allowed for pull plus push.
pub const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_secs(120);

/// Branch the pull request targets on the upstream repository.
pub const PR_BASE_BRANCH: &str = "master";

pub struct App<G: GitOps, H: GithubOps> {
    pub git: G,
    pub gh: H,
    /// Source of the `GIT_*` variables, consulted on every request.
    pub vars: VarLookup,
    pub push_timeout: Duration,
    locks: RepoLocks,
}

impl<G: GitOps, H: GithubOps> App<G, H> {
    pub fn new(git: G, gh: H, vars: VarLookup) -> Self {
        Self {
            git,
            gh,
            vars,
            push_timeout: DEFAULT_PUSH_TIMEOUT,
            locks: RepoLocks::new(),
        }
    }

    pub fn with_push_timeout(mut self, push_timeout: Duration) -> Self {
        self.push_timeout = push_timeout;
        self
    }

    /// Read the configuration as it stands right now.
    pub(crate) fn load_config(&self) -> Result<Config, SubmitError> {
        Ok(Config::load(&*self.vars)?)
    }

    pub(crate) async fn repo_lock(&self, repo: &RepoRoot) -> Arc<Mutex<()>> {
        self.locks.get_lock(repo).await
    }
}

/// One mutex per repository, so submissions to the same working tree run one
/// at a time.
struct RepoLocks {
    locks: RwLock<HashMap<RepoRoot, Arc<Mutex<()>>>>,
}

impl RepoLocks {
    fn new() -> Self {
        Self {
            locks: RwLock::new(HashMap::new()),
        }
    }

    async fn get_lock(&self, repo: &RepoRoot) -> Arc<Mutex<()>> {
        {
            let locks = self.locks.read().await;
            if let Some(lock) = locks.get(repo) {
                return lock.clone();
            }
        }

        let mut locks = self.locks.write().await;
        locks
            .entry(repo.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
