use std::path::Component;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::LazyLock;

use anyhow::Result;
use anyhow::bail;
use log::debug;
use regex::Captures;
use regex::Regex;

/// Looks up a configuration variable by name.
pub type VarLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

pub const GIT_PARENT_DIR: &str = "GIT_PARENT_DIR";
pub const GIT_REPO_NAME: &str = "GIT_REPO_NAME";
pub const GIT_REMOTE_URL: &str = "GIT_REMOTE_URL";
pub const GIT_USER: &str = "GIT_USER";
pub const GIT_REMOTE_UPSTREAM: &str = "GIT_REMOTE_UPSTREAM";
pub const GIT_BRANCH_NAME: &str = "GIT_BRANCH_NAME";
pub const GITHUB_ACCESS_TOKEN: &str = "GITHUB_ACCESS_TOKEN";

// `$NAME` or `${NAME}`
static VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))")
        .expect("valid regex")
});

/// Per-request git and GitHub settings, read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub parent_dir: PathBuf,
    pub repo_name: String,
    pub remote_url: String,
    pub user: String,
    pub upstream: String,
    /// Name of both the branch and the remote.
    pub branch: String,
    pub access_token: Option<String>,
}

#[derive(Debug, thiserror::Error)]
#[error("Missing configuration value: {0}")]
pub struct MissingVar(pub &'static str);

/// Lookup backed by the process environment.
pub fn process_env() -> VarLookup {
    Arc::new(|name: &str| std::env::var(name).ok())
}

impl Config {
    /// Load config through `lookup`, expanding variables in every value.
    ///
    /// Values are expanded with the same lookup, so `GIT_USER=$JUPYTERHUB_USER`
    /// resolves the way a shell would. Unknown variables are kept verbatim.
    pub fn load(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self, MissingVar> {
        let required = |name: &'static str| -> Result<String, MissingVar> {
            let value = lookup(name)
                .map(|v| expand_vars(&v, lookup))
                .unwrap_or_default();
            if value.trim().is_empty() {
                return Err(MissingVar(name));
            }
            debug!("{} = {}", name, value);
            Ok(value)
        };

        let config = Self {
            parent_dir: PathBuf::from(required(GIT_PARENT_DIR)?),
            repo_name: required(GIT_REPO_NAME)?,
            remote_url: required(GIT_REMOTE_URL)?,
            user: required(GIT_USER)?,
            upstream: required(GIT_REMOTE_UPSTREAM)?,
            branch: required(GIT_BRANCH_NAME)?,
            access_token: lookup(GITHUB_ACCESS_TOKEN)
                .map(|v| expand_vars(&v, lookup))
                .filter(|v| !v.trim().is_empty()),
        };
        debug!(
            "{} is {}",
            GITHUB_ACCESS_TOKEN,
            if config.access_token.is_some() { "set" } else { "unset" }
        );

        Ok(config)
    }

    /// Directory the repository lives in, `<parent>/<repo name>`.
    pub fn repo_dir(&self) -> PathBuf {
        self.parent_dir.join(&self.repo_name)
    }

    /// The remote shares its name with the branch.
    pub fn remote(&self) -> &str {
        &self.branch
    }

    /// Absolute path of a submitted file inside the repository directory.
    ///
    /// `filename` is relative to the repository directory; a leading `/` is
    /// allowed. Anything that could leave the directory is rejected.
    pub fn file_path(&self, filename: &str) -> Result<PathBuf> {
        Ok(self.repo_dir().join(relative_path(filename)?))
    }
}

fn relative_path(filename: &str) -> Result<PathBuf> {
    let trimmed = filename.trim_start_matches('/');
    if trimmed.is_empty() {
        bail!("empty filename");
    }

    let mut path = PathBuf::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                bail!("filename escapes the repository: {}", filename)
            }
        }
    }
    if path.as_os_str().is_empty() {
        bail!("filename names no file: {}", filename);
    }

    Ok(path)
}

/// Expand `$NAME` and `${NAME}` references, leaving unknown names untouched.
pub fn expand_vars(value: &str, lookup: &dyn Fn(&str) -> Option<String>) -> String {
    VAR_PATTERN
        .replace_all(value, |caps: &Captures| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            lookup(name).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
