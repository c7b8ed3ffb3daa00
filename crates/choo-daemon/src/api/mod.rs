//! The control API (spec.md §6, SPEC_FULL.md §6): JSON request/response
//! for unary calls plus Server-Sent Events for `WatchJob`, served over a
//! Unix-domain socket. Routing/handler shape grounded on
//! `everruns-control-plane`'s `events.rs` (`AppState` + `Router::with_state`,
//! SSE via `axum::response::sse`).

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::error::ManagerError;
use crate::manager::JobManager;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<JobManager>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/jobs", post(start_job).get(list_jobs))
        .route("/v1/jobs/:id", get(get_job))
        .route("/v1/jobs/:id/stop", post(stop_job))
        .route("/v1/jobs/:id/watch", get(watch_job))
        .route("/v1/health", get(health))
        .route("/v1/shutdown", post(shutdown))
        .with_state(state)
}

struct ApiError(ManagerError);

impl From<ManagerError> for ApiError {
    fn from(e: ManagerError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct StartJobRequest {
    tasks_dir: std::path::PathBuf,
    target_branch: String,
    repo_path: std::path::PathBuf,
    feature_branch: Option<String>,
    parallelism: Option<usize>,
}

#[derive(Debug, Serialize)]
struct StartJobResponse {
    job_id: String,
}

async fn start_job(State(state): State<AppState>, Json(req): Json<StartJobRequest>) -> Result<Json<StartJobResponse>, ApiError> {
    let cfg = choo_types::JobConfig {
        repo_path: req.repo_path,
        tasks_dir: req.tasks_dir,
        target_branch: req.target_branch,
        parallelism: req.parallelism.unwrap_or(0),
        unit_filter: None,
        feature_branch: req.feature_branch,
    };
    let job_id = state.manager.start(cfg).await?;
    Ok(Json(StartJobResponse { job_id }))
}

#[derive(Debug, Deserialize, Default)]
struct StopJobRequest {
    #[serde(default)]
    force: bool,
}

async fn stop_job(State(state): State<AppState>, Path(id): Path<String>, body: Option<Json<StopJobRequest>>) -> Result<StatusCode, ApiError> {
    let force = body.map(|b| b.0.force).unwrap_or(false);
    state.manager.stop(&id, force).await?;
    Ok(StatusCode::OK)
}

async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<choo_types::Job>, ApiError> {
    let job = state.manager.get_job(&id).await?;
    Ok(Json(job))
}

#[derive(Debug, Deserialize)]
struct ListJobsQuery {
    status: Option<String>,
}

async fn list_jobs(State(state): State<AppState>, Query(query): Query<ListJobsQuery>) -> Result<Json<Vec<choo_types::Job>>, ApiError> {
    let filter = query.status.as_deref().and_then(parse_job_status);
    let jobs = state.manager.list_jobs(filter).await?;
    Ok(Json(jobs))
}

fn parse_job_status(s: &str) -> Option<choo_types::JobStatus> {
    use choo_types::JobStatus::*;
    match s {
        "pending" => Some(Pending),
        "running" => Some(Running),
        "completed" => Some(Completed),
        "failed" => Some(Failed),
        "cancelled" => Some(Cancelled),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct WatchQuery {
    #[serde(default)]
    from_sequence: i64,
}

async fn watch_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<WatchQuery>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let rx = state.manager.subscribe(&id, query.from_sequence).await?;
    let stream = ReceiverStream::new(rx).map(|event| {
        let event_type = event.event_type.to_string();
        let sequence = event.sequence.unwrap_or(0);
        let json = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        Ok(SseEvent::default().event(event_type).data(json).id(sequence.to_string()))
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    healthy: bool,
    active_jobs: usize,
    version: &'static str,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        healthy: true,
        active_jobs: state.manager.active_job_count(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Deserialize)]
struct ShutdownRequest {
    #[serde(default)]
    wait_for_jobs: bool,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Serialize)]
struct ShutdownResponse {
    success: bool,
    jobs_stopped: usize,
}

async fn shutdown(State(state): State<AppState>, Json(req): Json<ShutdownRequest>) -> Result<Json<ShutdownResponse>, ApiError> {
    let timeout = Duration::from_secs(req.timeout_seconds.unwrap_or(30));
    let jobs_stopped = state.manager.shutdown(req.wait_for_jobs, timeout).await?;
    Ok(Json(ShutdownResponse { success: true, jobs_stopped }))
}
