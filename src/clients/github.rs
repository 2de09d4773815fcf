use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::Serialize;
use tracing::instrument;

pub const DEFAULT_API_URL: &str = "https://api.github.com";

const USER_AGENT: &str = concat!("nbcommit/", env!("CARGO_PKG_VERSION"));

// -----------------------------------------------------------------------------
// Types

/// Body of `POST /repos/{owner}/{repo}/pulls`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatePullRequest {
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct GitHubError {
    message: String,
}

// -----------------------------------------------------------------------------
// GithubOps trait

/// Operations for interacting with GitHub
#[cfg_attr(test, automock)]
#[async_trait]
pub trait GithubOps: Send + Sync {
    /// Open a pull request on `upstream` (`owner/repo`) and return its URL.
    async fn pr_create(
        &self,
        upstream: &str,
        token: &str,
        request: &CreatePullRequest,
    ) -> Result<String>;
}

// -----------------------------------------------------------------------------
// RealGithub

/// GitHub REST API client.
pub struct RealGithub {
    api_url: String,
    http: reqwest::Client,
}

impl RealGithub {
    pub fn new(api_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }
}

#[async_trait]
impl GithubOps for RealGithub {
    #[instrument(skip_all, fields(upstream = %upstream))]
    async fn pr_create(
        &self,
        upstream: &str,
        token: &str,
        request: &CreatePullRequest,
    ) -> Result<String> {
        let url = format!("{}/repos/{}/pulls", self.api_url, upstream);

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("token {}", token))
            .header("Accept", "application/vnd.github+json")
            .json(request)
            .send()
            .await
            .with_context(|| format!("Pull request to {} failed", url))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if status != StatusCode::CREATED {
            // Try to parse error message from response
            if let Ok(error) = serde_json::from_str::<GitHubError>(&text) {
                bail!("GitHub API error ({}): {}", status, error.message);
            }
            bail!("GitHub API request failed with status {}: {}", status, text);
        }

        let pr: PullRequest =
            serde_json::from_str(&text).context("Unexpected pull request response")?;
        Ok(pr.html_url)
    }
}
