//! The single HTTP resource: `POST /workers/{worker_id}/jobs` plus its
//! `OPTIONS` preflight and `GET /jobs/{uuid}` status companion. Grounded
//! on `original_source/.../views.py` (parse → authenticate → authorize →
//! enqueue pipeline) and the teacher's `channels/http.rs` handler shape
//! (state extraction, typed request/response structs, explicit status
//! codes rather than a generic error middleware).

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::auth::{canonicalize, satisfies};
use super::error::ApiError;
use super::AppState;
use crate::worker::{Caller, Job};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/workers/{worker_id}/jobs", post(create_job).options(options_jobs))
        .route("/jobs/{uuid}", get(job_status))
        .fallback(method_not_allowed)
        .with_state(state)
}

async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}

async fn options_jobs(State(state): State<AppState>) -> Response {
    (
        StatusCode::OK,
        [
            ("Access-Control-Allow-Origin", state.config.cors_origin.clone()),
            ("Access-Control-Allow-Methods", "OPTIONS,POST".to_string()),
        ],
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct CreateJobQuery {
    task_name: String,
}

#[derive(Debug, Serialize)]
struct CreateJobResponse {
    task_id: Uuid,
    task_name: String,
    worker_id: String,
}

fn valid_worker_id(worker_id: &str) -> bool {
    let len_ok = (1..=128).contains(&worker_id.len());
    len_ok && worker_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

async fn create_job(
    State(state): State<AppState>,
    Path(worker_id): Path<String>,
    Query(query): Query<CreateJobQuery>,
    method: Method,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    if !valid_worker_id(&worker_id) {
        return Err(ApiError::BadRequest("invalid worker_id".to_string()));
    }
    if !state.config.task_names.contains(&query.task_name) {
        return Err(ApiError::BadRequest(format!("unknown task_name: {}", query.task_name)));
    }
    if state.config.enforce_worker_known && state.registry.lookup(&worker_id).is_none() {
        return Err(ApiError::NotFound(format!("worker {worker_id} is not managed by this controller")));
    }

    let authorization = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::AuthFailed("missing Authorization header".to_string()))?;
    let host = headers.get("host").and_then(|v| v.to_str().ok()).unwrap_or("");
    let forwarded_proto = headers.get("x-forwarded-proto").and_then(|v| v.to_str().ok());
    let port = state.config.bind_addr.port();
    let resource = format!("/workers/{worker_id}/jobs?task_name={}", query.task_name);

    let canonical = canonicalize(method.as_str(), &resource, host, port, authorization, forwarded_proto);

    let verified = state
        .auth_verifier
        .verify(&canonical)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;

    let client_id = match verified.status.as_deref() {
        Some("auth-success") => verified.client_id.clone().unwrap_or_default(),
        Some("auth-failed") => {
            return Err(ApiError::AuthFailed(verified.message.unwrap_or_else(|| "Unauthorized".to_string())));
        }
        _ => return Err(ApiError::AuthFailed("authentication failed".to_string())),
    };

    let required = state
        .config
        .required_scope_sets
        .get(&query.task_name)
        .cloned()
        .unwrap_or_else(|| vec![vec![format!("project:releng:hardware:{}", query.task_name)]]);

    if !satisfies(&required, &verified.scopes) {
        return Err(ApiError::Forbidden);
    }

    let job = Job {
        id: Uuid::new_v4(),
        worker_id: worker_id.clone(),
        task_name: query.task_name.clone(),
        requested_by: Caller { client_id, scopes: verified.scopes },
        created_at: Utc::now(),
    };

    let task_id = job.id;
    state
        .job_tx
        .send(job)
        .await
        .map_err(|_| ApiError::Internal("job queue is closed".to_string()))?;

    Ok((
        StatusCode::CREATED,
        Json(CreateJobResponse { task_id, task_name: query.task_name, worker_id }),
    )
        .into_response())
}

#[derive(Debug, Serialize)]
struct JobStatusResponse {
    task_id: Uuid,
    status: &'static str,
    date_done: Option<chrono::DateTime<Utc>>,
    result: Option<crate::worker::JobResult>,
}

async fn job_status(State(state): State<AppState>, Path(uuid): Path<Uuid>) -> Result<Json<JobStatusResponse>, ApiError> {
    let result = state
        .job_store
        .get_result(uuid)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;

    match result {
        Some(result) => Ok(Json(JobStatusResponse {
            task_id: uuid,
            status: "done",
            date_done: Some(result.completed_at),
            result: Some(result),
        })),
        None => Err(ApiError::NotFound(format!("no job found with id {uuid}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_typical_worker_ids() {
        assert!(valid_worker_id("t-w1064-ms-001"));
        assert!(valid_worker_id("tc-worker_1"));
    }

    #[test]
    fn rejects_empty_and_oversized_worker_ids() {
        assert!(!valid_worker_id(""));
        assert!(!valid_worker_id(&"a".repeat(129)));
    }

    #[test]
    fn rejects_non_alphanumeric_characters() {
        assert!(!valid_worker_id("worker/with/slash"));
        assert!(!valid_worker_id("worker id"));
    }
}
