//! HTTP handlers for the Job/Run Service (spec.md §4.7).

use std::sync::Arc;

use axum::extract::{Path as AxPath, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use foreman_proto::{Event, EventKind, InterruptReason, Job, JobId, RunId};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::AppState;

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn list_jobs(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.jobs.list() {
        Ok(jobs) => Json(jobs).into_response(),
        Err(err) => internal_error(err),
    }
}

#[derive(Deserialize)]
pub struct CreateJobBody {
    prompt: String,
}

pub async fn create_job(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateJobBody>,
) -> impl IntoResponse {
    let job = Job::new(body.prompt, now_millis());
    match state.jobs.save(&job) {
        Ok(()) => (StatusCode::CREATED, Json(job)).into_response(),
        Err(err) => internal_error(err),
    }
}

pub async fn get_job(
    State(state): State<Arc<AppState>>,
    AxPath(id): AxPath<String>,
) -> impl IntoResponse {
    match state.jobs.get(&JobId::from(id)) {
        Ok(job) => Json(job).into_response(),
        Err(_) => not_found("job"),
    }
}

#[derive(Deserialize, Default)]
pub struct UpdateJobBody {
    prompt: Option<String>,
    status: Option<foreman_proto::JobStatus>,
    #[serde(rename = "runId")]
    run_id: Option<RunId>,
    #[serde(rename = "runIds")]
    run_ids: Option<Vec<RunId>>,
}

pub async fn update_job(
    State(state): State<Arc<AppState>>,
    AxPath(id): AxPath<String>,
    Json(body): Json<UpdateJobBody>,
) -> impl IntoResponse {
    let job_id = JobId::from(id);
    let mut job = match state.jobs.get(&job_id) {
        Ok(job) => job,
        Err(_) => return not_found("job"),
    };

    if let Some(prompt) = body.prompt {
        job.prompt = prompt;
    }
    if let Some(status) = body.status {
        job.status = status;
    }
    if let Some(run_id) = body.run_id {
        job.run_id = Some(run_id);
    }
    if let Some(run_ids) = body.run_ids {
        job.run_ids = run_ids;
    }

    match state.jobs.save(&job) {
        Ok(()) => Json(job).into_response(),
        Err(err) => internal_error(err),
    }
}

pub async fn delete_job(
    State(state): State<Arc<AppState>>,
    AxPath(id): AxPath<String>,
) -> impl IntoResponse {
    let job_id = JobId::from(id);
    match state.jobs.get(&job_id) {
        Ok(job) if !job.is_deletable() => (
            StatusCode::CONFLICT,
            Json(json!({ "error": "job is currently running" })),
        )
            .into_response(),
        Ok(_) => match state.jobs.delete(&job_id) {
            Ok(()) => StatusCode::NO_CONTENT.into_response(),
            Err(err) => internal_error(err),
        },
        Err(_) => not_found("job"),
    }
}

#[derive(Deserialize)]
pub struct PromptBody {
    prompt: String,
    #[serde(rename = "jobId")]
    job_id: Option<JobId>,
}

#[derive(Serialize)]
pub struct PromptResponse {
    id: RunId,
}

/// Mints a new run id, associates it with a job if one was supplied, kicks
/// off the orchestrator asynchronously, and returns 202 immediately
/// (spec.md §4.7, `POST /prompt`).
pub async fn prompt(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PromptBody>,
) -> impl IntoResponse {
    let run_id = RunId::new();

    if let Some(job_id) = &body.job_id {
        match state.jobs.get(job_id) {
            Ok(mut job) => {
                job.record_run(run_id.clone());
                if let Err(err) = state.jobs.save(&job) {
                    return internal_error(err);
                }
                state.run_job_map.insert(run_id.clone(), job_id.clone());
            }
            Err(_) => return not_found("job"),
        }
    }

    state.track_active_run(run_id.clone());
    (state.on_prompt)(run_id.clone(), body.job_id.clone(), body.prompt.clone());

    (StatusCode::ACCEPTED, Json(PromptResponse { id: run_id })).into_response()
}

#[derive(Deserialize)]
pub struct RunsStatusBody {
    #[serde(rename = "runIds")]
    run_ids: Vec<RunId>,
}

pub async fn runs_status(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RunsStatusBody>,
) -> impl IntoResponse {
    let mut result = serde_json::Map::new();
    for run_id in body.run_ids {
        let status = state.events.derive_status(&run_id);
        result.insert(run_id.as_str().to_string(), json!(status.as_str()));
    }
    Json(serde_json::Value::Object(result))
}

#[derive(Deserialize)]
pub struct InterruptBody {
    reason: InterruptReason,
}

pub async fn interrupt_run(
    State(state): State<Arc<AppState>>,
    AxPath(run_id): AxPath<String>,
    Json(body): Json<InterruptBody>,
) -> impl IntoResponse {
    let run_id = RunId::from(run_id);
    let event = Event::new(EventKind::RalphInterrupted { reason: body.reason }, now_millis())
        .with_run_id(run_id);
    state.bus.publish(event);
    StatusCode::OK
}

pub async fn run_events(
    State(state): State<Arc<AppState>>,
    AxPath(run_id): AxPath<String>,
) -> impl IntoResponse {
    match state.events.read_all(&RunId::from(run_id)) {
        Ok(events) => Json(events).into_response(),
        Err(err) => internal_error(err),
    }
}

#[derive(Deserialize)]
pub struct EventsQuery {
    #[serde(rename = "runId")]
    run_id: Option<String>,
}

pub async fn events_sse(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
) -> impl IntoResponse {
    let receiver = state.live.subscribe();
    crate::sse::stream(receiver, query.run_id.map(RunId::from))
}

pub async fn caffinate(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.enter_caffeinated();
    StatusCode::OK
}

pub async fn shutdown(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.schedule_shutdown();
    StatusCode::OK
}

fn not_found(what: &str) -> axum::response::Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": format!("{what} not found") }))).into_response()
}

fn internal_error(err: impl std::fmt::Display) -> axum::response::Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": err.to_string() })),
    )
        .into_response()
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
