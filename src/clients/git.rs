use std::fmt::Display;
use std::path::Path;
use std::path::PathBuf;
use std::process::Output;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::process::Command;
use tracing::instrument;

// -----------------------------------------------------------------------------
// Types

/// Top level of a git working tree.
///
/// Every git operation receives the repository explicitly; nothing here reads
/// or changes the process working directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoRoot(pub PathBuf);

impl Display for RepoRoot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl AsRef<Path> for RepoRoot {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitId(pub String);

impl Display for CommitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-ref outcome of a push, from `git push --porcelain`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushFlag {
    UpToDate,
    FastForward,
    NewHead,
    NewTag,
    ForcedUpdate,
    Deleted,
    Rejected,
    RemoteRejected,
    Error,
}

impl PushFlag {
    /// Flags that mean the remote now holds what we pushed.
    pub fn is_success(self) -> bool {
        matches!(
            self,
            Self::UpToDate | Self::FastForward | Self::NewHead | Self::NewTag
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushInfo {
    pub flag: PushFlag,
    pub local_ref: String,
    pub remote_ref: String,
    pub summary: String,
}

// -----------------------------------------------------------------------------
// GitOps trait

/// Operations for interacting with Git
#[cfg_attr(test, automock)]
#[async_trait]
pub trait GitOps: Send + Sync {
    /// Resolve the top level of the working tree containing `dir`.
    async fn toplevel(&self, dir: &Path) -> Result<RepoRoot>;

    async fn branch_exists(&self, repo: &RepoRoot, branch: &str) -> Result<bool>;

    /// Create `branch` at HEAD and check it out.
    async fn create_branch(&self, repo: &RepoRoot, branch: &str) -> Result<()>;

    async fn checkout(&self, repo: &RepoRoot, branch: &str) -> Result<()>;

    async fn add(&self, repo: &RepoRoot, path: &Path) -> Result<()>;

    /// Commit every tracked change (`commit -a`).
    async fn commit_all(&self, repo: &RepoRoot, message: &str) -> Result<CommitId>;

    /// URL of `remote`, or `None` when no such remote is configured.
    async fn remote_url(&self, repo: &RepoRoot, remote: &str) -> Result<Option<String>>;

    async fn add_remote(&self, repo: &RepoRoot, remote: &str, url: &str) -> Result<()>;

    /// Pull `branch` from `remote` if the remote has that branch.
    /// Returns whether a pull happened.
    async fn pull(&self, repo: &RepoRoot, remote: &str, branch: &str) -> Result<bool>;

    /// Push the local `branch` to the same name on `remote`.
    ///
    /// Refs the remote refused are reported through their flags rather than
    /// as an error; an error means git gave no per-ref report at all.
    async fn push(&self, repo: &RepoRoot, remote: &str, branch: &str) -> Result<Vec<PushInfo>>;
}

// -----------------------------------------------------------------------------
// RealGit

/// Real implementation that calls the git CLI
pub struct RealGit;

impl RealGit {
    async fn run(dir: &Path, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .current_dir(dir)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to execute git {}", args.join(" ")))
    }

    /// Run git and return trimmed stdout, failing on a non-zero exit.
    async fn git(dir: &Path, args: &[&str]) -> Result<String> {
        let output = Self::run(dir, args).await?;

        if !output.status.success() {
            bail!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(String::from_utf8(output.stdout)?.trim().to_string())
    }
}

#[async_trait]
impl GitOps for RealGit {
    #[instrument(skip_all, fields(dir = %dir.display()))]
    async fn toplevel(&self, dir: &Path) -> Result<RepoRoot> {
        let path = Self::git(dir, &["rev-parse", "--show-toplevel"]).await?;
        if path.is_empty() {
            bail!("{} is not inside a work tree", dir.display());
        }
        Ok(RepoRoot(PathBuf::from(path)))
    }

    #[instrument(skip_all)]
    async fn branch_exists(&self, repo: &RepoRoot, branch: &str) -> Result<bool> {
        let output = Self::run(
            repo.as_ref(),
            &[
                "rev-parse",
                "--verify",
                "--quiet",
                &format!("refs/heads/{}", branch),
            ],
        )
        .await?;

        // Exit code 0 means the ref exists, 1 means it doesn't
        Ok(output.status.success())
    }

    #[instrument(skip_all)]
    async fn create_branch(&self, repo: &RepoRoot, branch: &str) -> Result<()> {
        Self::git(repo.as_ref(), &["checkout", "-b", branch, "HEAD"]).await?;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn checkout(&self, repo: &RepoRoot, branch: &str) -> Result<()> {
        Self::git(repo.as_ref(), &["checkout", branch]).await?;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn add(&self, repo: &RepoRoot, path: &Path) -> Result<()> {
        let path = path.to_str().context("File path is not valid UTF-8")?;
        Self::git(repo.as_ref(), &["add", "--", path]).await?;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn commit_all(&self, repo: &RepoRoot, message: &str) -> Result<CommitId> {
        Self::git(repo.as_ref(), &["commit", "-a", "-m", message]).await?;
        let commit_id = Self::git(repo.as_ref(), &["rev-parse", "HEAD"]).await?;
        Ok(CommitId(commit_id))
    }

    #[instrument(skip_all)]
    async fn remote_url(&self, repo: &RepoRoot, remote: &str) -> Result<Option<String>> {
        let remotes = Self::git(repo.as_ref(), &["remote"]).await?;
        if !remotes.lines().any(|name| name.trim() == remote) {
            return Ok(None);
        }

        let url = Self::git(repo.as_ref(), &["remote", "get-url", remote]).await?;
        Ok(Some(url))
    }

    #[instrument(skip_all)]
    async fn add_remote(&self, repo: &RepoRoot, remote: &str, url: &str) -> Result<()> {
        Self::git(repo.as_ref(), &["remote", "add", remote, url]).await?;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn pull(&self, repo: &RepoRoot, remote: &str, branch: &str) -> Result<bool> {
        let head = format!("refs/heads/{}", branch);
        let output = Self::run(repo.as_ref(), &["ls-remote", "--exit-code", remote, &head]).await?;

        // --exit-code: 2 means the remote has no matching ref
        match output.status.code() {
            Some(0) => {}
            Some(2) => return Ok(false),
            _ => bail!(
                "git ls-remote {} failed: {}",
                remote,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        }

        // ls-remote patterns match any ref ending in /<pattern>
        if !has_ref(&String::from_utf8_lossy(&output.stdout), &head) {
            return Ok(false);
        }

        Self::git(
            repo.as_ref(),
            &["pull", "--no-rebase", "--no-edit", remote, &head],
        )
        .await?;
        Ok(true)
    }

    #[instrument(skip_all)]
    async fn push(&self, repo: &RepoRoot, remote: &str, branch: &str) -> Result<Vec<PushInfo>> {
        let refspec = format!("refs/heads/{}:refs/heads/{}", branch, branch);
        let output = Self::run(repo.as_ref(), &["push", "--porcelain", remote, &refspec]).await?;

        // A rejected ref still exits non-zero, but with a porcelain report
        let results = parse_push_porcelain(&String::from_utf8_lossy(&output.stdout));
        if results.is_empty() && !output.status.success() {
            bail!(
                "git push {} failed: {}",
                remote,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(results)
    }
}

/// Parse the ref lines of `git push --porcelain`.
///
/// Ref lines look like `<flag>\t<from>:<to>\t<summary>`; the `To <url>` header
/// and the trailing `Done` are skipped.
pub fn parse_push_porcelain(stdout: &str) -> Vec<PushInfo> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut fields = line.splitn(3, '\t');
            let flag = fields.next()?;
            let refs = fields.next()?;
            let summary = fields.next().unwrap_or("").trim().to_string();
            let (local_ref, remote_ref) = refs.split_once(':')?;

            let mut flag_chars = flag.chars();
            let flag = match (flag_chars.next()?, flag_chars.next()) {
                (c, None) => c,
                _ => return None,
            };
            let flag = match flag {
                '=' => PushFlag::UpToDate,
                ' ' => PushFlag::FastForward,
                '*' if remote_ref.starts_with("refs/tags/") => PushFlag::NewTag,
                '*' => PushFlag::NewHead,
                '+' => PushFlag::ForcedUpdate,
                '-' => PushFlag::Deleted,
                '!' if summary.contains("remote rejected") => PushFlag::RemoteRejected,
                '!' => PushFlag::Rejected,
                _ => PushFlag::Error,
            };

            Some(PushInfo {
                flag,
                local_ref: local_ref.to_string(),
                remote_ref: remote_ref.to_string(),
                summary,
            })
        })
        .collect()
}

/// Whether `git ls-remote` output lists exactly `name`.
fn has_ref(ls_remote: &str, name: &str) -> bool {
    ls_remote
        .lines()
        .filter_map(|line| line.split_once('\t'))
        .any(|(_, refname)| refname == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_ref_is_exact() {
        let out = "1111111111111111111111111111111111111111\trefs/heads/alice/work\n";
        assert!(!has_ref(out, "refs/heads/work"));
        assert!(has_ref(out, "refs/heads/alice/work"));
        assert!(!has_ref("", "refs/heads/work"));
    }

    #[test]
    fn test_parse_new_branch() {
        let out = "To /tmp/remote.git\n*\trefs/heads/alice:refs/heads/alice\t[new branch]\nDone\n";
        let results = parse_push_porcelain(out);
        assert_eq!(
            results,
            vec![PushInfo {
                flag: PushFlag::NewHead,
                local_ref: "refs/heads/alice".to_string(),
                remote_ref: "refs/heads/alice".to_string(),
                summary: "[new branch]".to_string(),
            }]
        );
    }

    #[test]
    fn test_parse_flags() {
        let out = concat!(
            "To git@github.com:alice/notebooks.git\n",
            "=\trefs/heads/a:refs/heads/a\t[up to date]\n",
            " \trefs/heads/b:refs/heads/b\t1111111..2222222\n",
            "*\trefs/tags/v1:refs/tags/v1\t[new tag]\n",
            "+\trefs/heads/c:refs/heads/c\t1111111...2222222 (forced update)\n",
            "-\t:refs/heads/d\t[deleted]\n",
            "!\trefs/heads/e:refs/heads/e\t[rejected] (non-fast-forward)\n",
            "!\trefs/heads/f:refs/heads/f\t[remote rejected] (pre-receive hook declined)\n",
            "?\trefs/heads/g:refs/heads/g\t???\n",
            "Done\n",
        );
        let flags: Vec<PushFlag> = parse_push_porcelain(out).iter().map(|r| r.flag).collect();
        assert_eq!(
            flags,
            vec![
                PushFlag::UpToDate,
                PushFlag::FastForward,
                PushFlag::NewTag,
                PushFlag::ForcedUpdate,
                PushFlag::Deleted,
                PushFlag::Rejected,
                PushFlag::RemoteRejected,
                PushFlag::Error,
            ]
        );
    }

    #[test]
    fn test_parse_ignores_noise() {
        assert!(parse_push_porcelain("").is_empty());
        assert!(parse_push_porcelain("To origin\nDone\n").is_empty());
        assert!(parse_push_porcelain("error: failed to push some refs\n").is_empty());
    }

    #[test]
    fn test_success_flags() {
        assert!(PushFlag::UpToDate.is_success());
        assert!(PushFlag::FastForward.is_success());
        assert!(PushFlag::NewHead.is_success());
        assert!(PushFlag::NewTag.is_success());
        assert!(!PushFlag::ForcedUpdate.is_success());
        assert!(!PushFlag::Deleted.is_success());
        assert!(!PushFlag::Rejected.is_success());
        assert!(!PushFlag::RemoteRejected.is_success());
        assert!(!PushFlag::Error.is_success());
    }
}
