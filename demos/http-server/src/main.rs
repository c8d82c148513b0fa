//! Minimal HTTP binding for `jobcore`.
//!
//! Exposes `POST /jobs` (submit) and `GET /jobs/:id` (poll status) over
//! a single-node [`jobcore_memory::LocalJobStore`], with one worker
//! running in the background dispatching to an `echo` handler. Exists
//! so the workspace is a runnable repository; the routing and
//! deserialization here are deliberately thin — this binary is not
//! where the job queue's guarantees are enforced.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use jobcore::{
    ExecutionContext, Handler, HandlerOutcome, HandlerRegistry, HttpContextSnapshot, JobManager,
    WorkerBuilder, WorkerConfig,
};
use jobcore_memory::LocalJobStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct EchoHandler;

#[async_trait::async_trait]
impl Handler<serde_json::Value, serde_json::Value> for EchoHandler {
    async fn execute(
        &self,
        request: serde_json::Value,
        _ctx: &ExecutionContext,
        _cancel: &CancellationToken,
    ) -> HandlerOutcome<serde_json::Value> {
        HandlerOutcome::Success(request)
    }
}

#[derive(Clone)]
struct AppState {
    manager: JobManager,
    job_id_header: String,
}

#[derive(Deserialize)]
struct SubmitJobRequest {
    name: String,
    payload: serde_json::Value,
}

#[derive(Serialize)]
struct SubmitJobResponse {
    id: Uuid,
    status: jobcore::JobStatus,
}

async fn submit_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SubmitJobRequest>,
) -> impl IntoResponse {
    let job_id = headers
        .get(state.job_id_header.as_str())
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok());

    let mut snapshot_headers = HashMap::new();
    for (name, value) in headers.iter() {
        let entry: &mut Vec<Option<String>> = snapshot_headers.entry(name.to_string()).or_default();
        entry.push(value.to_str().ok().map(str::to_string));
    }

    let ctx = HttpContextSnapshot {
        headers: snapshot_headers,
        route_params: HashMap::new(),
        query_params: Vec::new(),
        job_id,
    };

    let payload = match serde_json::to_vec(&req.payload) {
        Ok(bytes) => bytes,
        Err(err) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": err.to_string() })),
            )
                .into_response()
        }
    };

    match state.manager.submit(req.name, payload, ctx, None).await {
        Ok(job) => (
            StatusCode::ACCEPTED,
            Json(SubmitJobResponse {
                id: job.id,
                status: job.status,
            }),
        )
            .into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": err.to_string() })),
        )
            .into_response(),
    }
}

async fn get_job(State(state): State<AppState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    match state.manager.get_job(id).await {
        Ok(job) => Json(job).into_response(),
        Err(err) if err.code() == jobcore::ErrorCode::JobNotFound => {
            StatusCode::NOT_FOUND.into_response()
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": err.to_string() })),
        )
            .into_response(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = WorkerConfig::from_env();
    let store = Arc::new(LocalJobStore::new());
    let registry = HandlerRegistry::builder().with_body("echo", EchoHandler).build();

    let worker = WorkerBuilder::new(store, registry, config.clone()).build();
    let handle = worker.start();

    let state = AppState {
        manager: handle.manager().clone(),
        job_id_header: config.job_id_header_name.clone(),
    };

    let app = Router::new()
        .route("/jobs", post(submit_job))
        .route("/jobs/:id", get(get_job))
        .with_state(state);

    let addr = std::env::var("HTTP_SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    tracing::info!(%addr, "jobcore http server listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    handle.shutdown().await;
    Ok(())
}
