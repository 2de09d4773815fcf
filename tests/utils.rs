use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::Mutex;

use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::Request;
use axum::http::StatusCode;
use axum::routing::post;
use nbcommit::config::VarLookup;
use nbcommit::server::StatusBody;
use serde_json::Value;
use serde_json::json;
use tokio::process::Command;
use tower::ServiceExt as _;

/// Runs git in `dir` and returns trimmed stdout.
pub async fn git(dir: &Path, args: &[&str]) -> anyhow::Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .output()
        .await?;
    anyhow::ensure!(
        output.status.success(),
        "git {} failed: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stderr)
    );

    Ok(String::from_utf8(output.stdout)?.trim().to_string())
}

/// Creates a git repository in the given directory with one commit.
///
/// The initial commit tracks `notebooks/report.ipynb`, so later edits are
/// picked up by `commit -a`.
pub async fn create_git_repo(dir: &Path) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(dir.join("notebooks")).await?;
    git(dir, &["init", "--quiet"]).await?;
    git(dir, &["config", "user.name", "Test User"]).await?;
    git(dir, &["config", "user.email", "test@example.com"]).await?;
    git(dir, &["config", "commit.gpgsign", "false"]).await?;

    tokio::fs::write(dir.join("notebooks/report.ipynb"), "{\"cells\": []}\n").await?;
    git(dir, &["add", "."]).await?;
    git(dir, &["commit", "--quiet", "-m", "Initial notebooks"]).await?;

    Ok(())
}

/// Creates a bare repository to push to.
pub async fn create_bare_remote(dir: &Path) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    git(dir, &["init", "--quiet", "--bare"]).await?;
    Ok(())
}

/// Installs a pre-receive hook that refuses every push.
#[cfg(unix)]
pub async fn reject_pushes(bare: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt as _;

    let hook = bare.join("hooks/pre-receive");
    tokio::fs::create_dir_all(bare.join("hooks")).await?;
    tokio::fs::write(&hook, "#!/bin/sh\nexit 1\n").await?;
    tokio::fs::set_permissions(&hook, std::fs::Permissions::from_mode(0o755)).await?;
    Ok(())
}

/// Sends `PUT /git/commit` with a raw body.
pub async fn put_commit(router: &Router, body: impl Into<Body>) -> anyhow::Result<(StatusCode, StatusBody)> {
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/git/commit")
                .header("content-type", "application/json")
                .body(body.into())?,
        )
        .await?;

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    Ok((status, serde_json::from_slice(&bytes)?))
}

/// Lookup over a fixed set of variables.
pub fn lookup(vars: HashMap<String, String>) -> VarLookup {
    Arc::new(move |name: &str| vars.get(name).cloned())
}

// -----------------------------------------------------------------------------
// Fake GitHub

/// A pull request creation seen by [`FakeGithub`].
#[derive(Debug, Clone)]
pub struct ReceivedPr {
    pub path: String,
    pub authorization: Option<String>,
    pub body: Value,
}

type Received = Arc<Mutex<Vec<ReceivedPr>>>;

/// Stand-in for `POST /repos/{owner}/{repo}/pulls` answering with a fixed
/// status.
pub struct FakeGithub {
    pub url: String,
    received: Received,
}

impl FakeGithub {
    pub async fn start(status: StatusCode) -> anyhow::Result<Self> {
        let received: Received = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route("/repos/{owner}/{repo}/pulls", post(fake_pulls))
            .with_state((received.clone(), status));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move { axum::serve(listener, app).await });

        Ok(Self {
            url: format!("http://{}", addr),
            received,
        })
    }

    pub fn received(&self) -> Vec<ReceivedPr> {
        self.received.lock().unwrap().clone()
    }
}

async fn fake_pulls(
    State((received, status)): State<(Received, StatusCode)>,
    axum::extract::Path((owner, repo)): axum::extract::Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    received.lock().unwrap().push(ReceivedPr {
        path: format!("/repos/{}/{}/pulls", owner, repo),
        authorization: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string()),
        body,
    });

    let reply = if status == StatusCode::CREATED {
        json!({ "number": 1, "html_url": format!("https://github.com/{}/{}/pull/1", owner, repo) })
    } else {
        json!({ "message": status.canonical_reason().unwrap_or("error") })
    };
    (status, Json(reply))
}

// -----------------------------------------------------------------------------
// Test directories

pub enum TestDir {
    Temp(tempfile::TempDir),
    Kept(PathBuf),
}

impl TestDir {
    pub fn new() -> std::io::Result<Self> {
        let temp_dir = tempfile::tempdir()?;

        if std::env::var("DEBUG_TESTS").is_ok() {
            let path = temp_dir.keep();
            eprintln!("Test directory kept at: {}", path.display());
            Ok(TestDir::Kept(path))
        } else {
            Ok(TestDir::Temp(temp_dir))
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            TestDir::Temp(t) => t.path(),
            TestDir::Kept(p) => p.as_path(),
        }
    }
}
