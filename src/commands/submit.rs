use serde::Deserialize;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use crate::App;
use crate::app::PR_BASE_BRANCH;
use crate::clients::git::CommitId;
use crate::clients::git::GitOps;
use crate::clients::git::PushInfo;
use crate::clients::git::RepoRoot;
use crate::clients::github::CreatePullRequest;
use crate::clients::github::GithubOps;
use crate::config::Config;
use crate::config::GITHUB_ACCESS_TOKEN;
use crate::error::SubmitError;

// -----------------------------------------------------------------------------
// Types

/// Body of `PUT /git/commit`.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitRequest {
    /// Percent-encoded path of the edited file, relative to the repository
    /// directory.
    pub filename: String,
    pub msg: String,
}

/// A committed and pushed change.
#[derive(Debug)]
pub struct Submission {
    /// Decoded filename, as the client sent it.
    pub filename: String,
    pub branch: String,
    pub remote_url: String,
    pub commit_id: CommitId,
    pub pushed: Vec<PushInfo>,
    pub pull_request: PullRequestStatus,
}

/// What happened when opening the pull request. Never fails a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullRequestStatus {
    Opened { url: String },
    Failed { reason: String },
    Skipped { reason: String },
}

impl Submission {
    pub fn status_text(&self) -> String {
        format!(
            "Success!  Changes to {} captured on branch {} at {}",
            self.filename, self.branch, self.remote_url
        )
    }
}

/// Commit message for an edit of `filename`.
pub fn commit_message(msg: &str, filename: &str) -> String {
    format!("{}\n\nUpdated {}", msg, filename)
}

// -----------------------------------------------------------------------------
// Command

impl<G: GitOps, H: GithubOps> App<G, H> {
    /// Commit an edited file and propose it upstream.
    ///
    /// 1. Resolve the repository and take its lock.
    /// 2. Switch to the configured branch, creating it from HEAD if needed.
    /// 3. Stage the file and commit all tracked changes.
    /// 4. Make sure the remote exists.
    /// 5. Pull, then push the branch, and check every pushed ref.
    /// 6. Open a pull request upstream; failure here is only logged.
    #[instrument(skip_all, fields(filename = %request.filename))]
    pub async fn cmd_submit(&self, request: &SubmitRequest) -> Result<Submission, SubmitError> {
        let config = self.load_config()?;

        let filename = urlencoding::decode(&request.filename)
            .map_err(|e| SubmitError::Request(format!("filename is not valid UTF-8: {}", e)))?
            .into_owned();
        let file_path = config
            .file_path(&filename)
            .map_err(|source| SubmitError::Filename {
                filename: filename.clone(),
                source,
            })?;

        let repo_dir = config.repo_dir();
        let repo = self
            .git
            .toplevel(&repo_dir)
            .await
            .map_err(|source| SubmitError::Repository {
                dir: repo_dir.clone(),
                source,
            })?;
        info!("Repository: {}", repo);

        let lock = self.repo_lock(&repo).await;
        let _guard = lock.lock().await;

        self.upsert_branch(&repo, &config.branch).await?;

        info!("Will add {}", file_path.display());
        let commit_id = async {
            self.git.add(&repo, &file_path).await?;
            self.git
                .commit_all(&repo, &commit_message(&request.msg, &filename))
                .await
        }
        .await
        .map_err(|source| SubmitError::Commit {
            path: file_path.clone(),
            source,
        })?;
        info!("Committed {}", commit_id);

        self.upsert_remote(&repo, config.remote(), &config.remote_url)
            .await?;

        let pushed = self.pull_and_push(&repo, &config).await?;
        validate_push(config.remote(), &pushed)?;
        info!("Pushed {} to {}", config.branch, config.remote());

        let pull_request = self.open_pull_request(&config).await;

        Ok(Submission {
            filename,
            branch: config.branch,
            remote_url: config.remote_url,
            commit_id,
            pushed,
            pull_request,
        })
    }

    async fn upsert_branch(&self, repo: &RepoRoot, branch: &str) -> Result<(), SubmitError> {
        let result = async {
            if self.git.branch_exists(repo, branch).await? {
                info!("Switching to {}", branch);
                self.git.checkout(repo, branch).await
            } else {
                info!("Creating branch {}", branch);
                self.git.create_branch(repo, branch).await
            }
        }
        .await;

        result.map_err(|source| SubmitError::Branch {
            branch: branch.to_string(),
            source,
        })
    }

    async fn upsert_remote(
        &self,
        repo: &RepoRoot,
        remote: &str,
        url: &str,
    ) -> Result<(), SubmitError> {
        let result = async {
            match self.git.remote_url(repo, remote).await? {
                Some(existing) => {
                    info!("Remote {} already exists", remote);
                    if existing != url {
                        warn!(
                            "Remote {} points at {}, not the configured {}",
                            remote, existing, url
                        );
                    }
                    Ok(())
                }
                None => self.git.add_remote(repo, remote, url).await,
            }
        }
        .await;

        result.map_err(|source| SubmitError::Remote {
            remote: remote.to_string(),
            source,
        })
    }

    async fn pull_and_push(
        &self,
        repo: &RepoRoot,
        config: &Config,
    ) -> Result<Vec<PushInfo>, SubmitError> {
        let remote = config.remote();
        let transfer = async {
            if self.git.pull(repo, remote, &config.branch).await? {
                info!("Pulled {} from {}", config.branch, remote);
            }
            self.git.push(repo, remote, &config.branch).await
        };

        let result = match tokio::time::timeout(self.push_timeout, transfer).await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!("timed out after {:?}", self.push_timeout)),
        };

        result.map_err(|source| SubmitError::Push {
            remote: remote.to_string(),
            source,
        })
    }

    async fn open_pull_request(&self, config: &Config) -> PullRequestStatus {
        let Some(token) = &config.access_token else {
            let reason = format!("{} is not set", GITHUB_ACCESS_TOKEN);
            warn!(
                "Error submitting Pull Request to {}: {}",
                config.upstream, reason
            );
            return PullRequestStatus::Skipped { reason };
        };

        let request = pull_request_for(config);
        match self.gh.pr_create(&config.upstream, token, &request).await {
            Ok(url) => {
                info!("Opened pull request {}", url);
                PullRequestStatus::Opened { url }
            }
            Err(e) => {
                warn!("Error submitting Pull Request to {}: {:#}", config.upstream, e);
                PullRequestStatus::Failed {
                    reason: format!("{:#}", e),
                }
            }
        }
    }
}

fn pull_request_for(config: &Config) -> CreatePullRequest {
    CreatePullRequest {
        title: format!("{} Notebooks", config.user),
        body: format!("IPython notebooks submitted by {}", config.user),
        head: format!("{}:{}", config.user, config.branch),
        base: PR_BASE_BRANCH.to_string(),
    }
}

/// Every pushed ref must have landed; an empty report counts as failure.
fn validate_push(remote: &str, pushed: &[PushInfo]) -> Result<(), SubmitError> {
    if pushed.is_empty() {
        return Err(SubmitError::PushRejected {
            remote: remote.to_string(),
            summary: "no refs were pushed".to_string(),
        });
    }

    if let Some(bad) = pushed.iter().find(|info| !info.flag.is_success()) {
        return Err(SubmitError::PushRejected {
            remote: remote.to_string(),
            summary: bad.summary.clone(),
        });
    }

    Ok(())
}
