use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use nbcommit::App;
use nbcommit::clients::git::RealGit;
use nbcommit::clients::github::DEFAULT_API_URL;
use nbcommit::clients::github::RealGithub;
use nbcommit::config::process_env;
use tracing::info;

#[derive(Parser)]
#[command(name = "nbcommit")]
#[command(about = "Serve PUT /git/commit: commit a notebook, push it and open a pull request", long_about = None)]
pub struct Cli {
    /// Address to listen on
    #[arg(long, env = "NBCOMMIT_BIND", default_value = "127.0.0.1:8888")]
    pub bind: String,

    /// Base URL the routes are mounted under
    #[arg(long, env = "NBCOMMIT_BASE_URL", default_value = "/")]
    pub base_url: String,

    /// GitHub REST API root
    #[arg(long, env = "NBCOMMIT_GITHUB_API_URL", default_value = DEFAULT_API_URL)]
    pub github_api_url: String,

    /// Seconds allowed for pull plus push
    #[arg(long, env = "NBCOMMIT_PUSH_TIMEOUT_SECS", default_value_t = 120)]
    pub push_timeout_secs: u64,

    /// Seconds allowed for the pull request API call
    #[arg(long, env = "NBCOMMIT_API_TIMEOUT_SECS", default_value_t = 30)]
    pub api_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    nbcommit::logging::setup_logging()?;

    let cli = Cli::parse();

    let gh = RealGithub::new(
        cli.github_api_url.as_str(),
        Duration::from_secs(cli.api_timeout_secs),
    )?;
    let app = App::new(RealGit, gh, process_env())
        .with_push_timeout(Duration::from_secs(cli.push_timeout_secs));

    let router = nbcommit::server::router(Arc::new(app), &cli.base_url);

    let listener = tokio::net::TcpListener::bind(&cli.bind)
        .await
        .with_context(|| format!("Failed to bind {}", cli.bind))?;
    info!(
        "Listening on http://{}{}",
        listener.local_addr()?,
        cli.base_url.trim_end_matches('/')
    );
    axum::serve(listener, router).await?;

    Ok(())
}
