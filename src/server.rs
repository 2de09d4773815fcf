//! HTTP surface: `PUT <base>/git/commit` and `GET <base>/health`.

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::put;
use serde::Deserialize;
use serde::Serialize;
use tracing::error;
use tracing::info;

use crate::App;
use crate::clients::git::GitOps;
use crate::clients::github::GithubOps;
use crate::commands::submit::SubmitRequest;
use crate::error::SubmitError;

/// Body of every response from the commit route.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusBody {
    pub status: u16,
    #[serde(rename = "statusText")]
    pub status_text: String,
}

/// Build the router, with routes mounted under `base_url`.
pub fn router<G, H>(app: Arc<App<G, H>>, base_url: &str) -> Router
where
    G: GitOps + 'static,
    H: GithubOps + 'static,
{
    let routes = Router::new()
        .route("/git/commit", put(commit_handler::<G, H>))
        .route("/health", get(|| async { "ok" }))
        .with_state(app);

    let base = base_url.trim_end_matches('/');
    if base.is_empty() {
        routes
    } else {
        let base = if base.starts_with('/') {
            base.to_string()
        } else {
            format!("/{}", base)
        };
        Router::new().nest(&base, routes)
    }
}

async fn commit_handler<G, H>(State(app): State<Arc<App<G, H>>>, body: Bytes) -> Response
where
    G: GitOps + 'static,
    H: GithubOps + 'static,
{
    // Malformed bodies fail like any other fault, with a 500
    let request: SubmitRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => return failure(SubmitError::Request(e.to_string())),
    };

    match app.cmd_submit(&request).await {
        Ok(submission) => {
            info!(
                "Submitted {} on {} ({:?})",
                submission.filename, submission.branch, submission.pull_request
            );
            (
                StatusCode::OK,
                Json(StatusBody {
                    status: StatusCode::OK.as_u16(),
                    status_text: submission.status_text(),
                }),
            )
                .into_response()
        }
        Err(e) => failure(e),
    }
}

fn failure(e: SubmitError) -> Response {
    error!("{}", e.detail());
    let status = StatusCode::INTERNAL_SERVER_ERROR;
    (
        status,
        Json(StatusBody {
            status: status.as_u16(),
            status_text: e.to_string(),
        }),
    )
        .into_response()
}
