//! Worker HTTP surface.
//!
//! Push transport for jobs plus inspection: `POST /jobs` accepts the wire
//! dispatch payload and funnels it into the same dedup + executor path the
//! promoter uses; `GET /runs/{id}` exposes run status and
//! `GET /projects/{id}/artifacts/latest` the newest published llms.txt URL.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use scn_core::Job;
use scn_pipeline::{DispatchOutcome, Dispatcher, PipelineContext};
use tokio::net::TcpListener;
use tracing::info;
use uuid::Uuid;

pub const CRATE_NAME: &str = "scn-web";

#[derive(Clone)]
pub struct AppState {
    pub ctx: PipelineContext,
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(ctx: PipelineContext) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(ctx.clone()));
        Self { ctx, dispatcher }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/jobs", post(submit_job_handler))
        .route("/runs/{id}", get(get_run_handler))
        .route(
            "/projects/{id}/artifacts/latest",
            get(latest_artifact_handler),
        )
        .with_state(Arc::new(state))
}

/// Bind and serve until the process exits.
pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let addr = state.ctx.config.bind_addr.clone();
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "worker http surface listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health_handler() -> Response {
    Json(serde_json::json!({ "status": "ok" })).into_response()
}

async fn submit_job_handler(
    State(state): State<Arc<AppState>>,
    Json(job): Json<Job>,
) -> Response {
    match state.dispatcher.submit(job).await {
        DispatchOutcome::Accepted(id) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "accepted": true, "id": id })),
        )
            .into_response(),
        DispatchOutcome::DuplicateJob(id) => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({ "accepted": false, "id": id, "error": "duplicate job" })),
        )
            .into_response(),
    }
}

async fn get_run_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Response {
    match state.ctx.store.get_run(id).await {
        Ok(Some(run)) => Json(run).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "run not found" })),
        )
            .into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": err.to_string() })),
        )
            .into_response(),
    }
}

async fn latest_artifact_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Response {
    match state.ctx.store.latest_artifact_url(id).await {
        Ok(Some(url)) => Json(serde_json::json!({ "llms_txt_url": url })).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "no artifact published" })),
        )
            .into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": err.to_string() })),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use chrono::Utc;
    use scn_core::{ArtifactRecord, Run, RunStatus, ARTIFACT_KIND_LLMS_TXT};
    use scn_pipeline::PipelineConfig;
    use scn_storage::{Fetch, FetchError, FetchedPage, MemStore, Store};
    use tower::ServiceExt;
    use url::Url;

    struct NoSite;

    #[async_trait]
    impl Fetch for NoSite {
        async fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError> {
            Err(FetchError::HttpStatus {
                status: 404,
                url: url.to_string(),
            })
        }
    }

    fn state(store: Arc<MemStore>) -> AppState {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = PipelineConfig {
            artifacts_dir: dir.keep(),
            ..Default::default()
        };
        AppState::new(PipelineContext::new(config, store, Arc::new(NoSite)))
    }

    fn json_request(uri: &str, method: &str, body: serde_json::Value) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .uri(uri)
            .method(method)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_responds_ok() {
        let app = app(state(Arc::new(MemStore::new())));
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn job_submission_accepts_the_wire_payload() {
        let app = app(state(Arc::new(MemStore::new())));
        let payload = serde_json::json!({
            "id": Uuid::new_v4(),
            "projectId": Uuid::new_v4(),
            "url": "https://example.com/",
            "priority": "scheduled",
            "render_mode": "STATIC",
            "isScheduled": true
        });
        let resp = app
            .oneshot(json_request("/jobs", "POST", payload))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn duplicate_job_submission_conflicts() {
        let app = app(state(Arc::new(MemStore::new())));
        let payload = serde_json::json!({
            "id": Uuid::new_v4(),
            "projectId": Uuid::new_v4(),
            "url": "https://example.com/"
        });

        let first = app
            .clone()
            .oneshot(json_request("/jobs", "POST", payload.clone()))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::ACCEPTED);

        let second = app
            .oneshot(json_request("/jobs", "POST", payload))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn run_lookup_round_trips_status() {
        let store = Arc::new(MemStore::new());
        let mut run = Run::queued(Uuid::new_v4(), Uuid::new_v4());
        run.status = RunStatus::CompleteNoDiffs;
        store.create_run(&run).await.unwrap();

        let app = app(state(store));
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri(format!("/runs/{}", run.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            json.get("status").and_then(|v| v.as_str()),
            Some("COMPLETE_NO_DIFFS")
        );
    }

    #[tokio::test]
    async fn latest_artifact_lookup_returns_the_newest_url() {
        let store = Arc::new(MemStore::new());
        let project_id = Uuid::new_v4();
        for (offset_secs, url) in [(60, "https://cdn.example.com/old/llms.txt"), (0, "https://cdn.example.com/new/llms.txt")] {
            store
                .insert_artifact(&ArtifactRecord {
                    id: Uuid::new_v4(),
                    project_id,
                    run_id: Uuid::new_v4(),
                    kind: ARTIFACT_KIND_LLMS_TXT.to_string(),
                    url: url.to_string(),
                    content_hash: "abc".to_string(),
                    created_at: Utc::now() - chrono::Duration::seconds(offset_secs),
                })
                .await
                .unwrap();
        }

        let app = app(state(store));
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri(format!("/projects/{project_id}/artifacts/latest"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            json.get("llms_txt_url").and_then(|v| v.as_str()),
            Some("https://cdn.example.com/new/llms.txt")
        );
    }

    #[tokio::test]
    async fn latest_artifact_lookup_without_artifacts_is_not_found() {
        let app = app(state(Arc::new(MemStore::new())));
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri(format!("/projects/{}/artifacts/latest", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn missing_run_is_not_found() {
        let app = app(state(Arc::new(MemStore::new())));
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri(format!("/runs/{}", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
