use std::path::PathBuf;

use crate::config::MissingVar;

/// Why a submission failed. `Display` is the reason returned to the client.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Config(#[from] MissingVar),

    #[error("Invalid request: {0}")]
    Request(String),

    #[error("Could not checkout repo: {}", .dir.display())]
    Repository {
        dir: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("Could not switch to branch {branch}")]
    Branch {
        branch: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Invalid filename: {filename}")]
    Filename {
        filename: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Could not commit changes to notebook: {}", .path.display())]
    Commit {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("Could not configure remote {remote}")]
    Remote {
        remote: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Could not push to remote {remote}")]
    Push {
        remote: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Could not push to remote {remote}: {summary}")]
    PushRejected { remote: String, summary: String },
}

impl SubmitError {
    /// The reason followed by its cause chain, for logs.
    pub fn detail(&self) -> String {
        let mut detail = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            detail.push_str(": ");
            detail.push_str(&cause.to_string());
            source = cause.source();
        }
        detail
    }
}
