/// Job queue REST API endpoints

use crate::api::{queue_status, AppState};
use crate::queue::{EnqueueOptions, Job, JobFilter, JobStats};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

/// Body of POST /jobs; queue options sit beside the job fields
#[derive(Debug, Deserialize)]
pub struct EnqueueJobRequest {
    pub job_type: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(flatten)]
    pub options: EnqueueOptions,
}

pub fn create_job_routes() -> Router<AppState> {
    Router::new()
        .route("/api/tenants/{tenant_id}/jobs", post(enqueue_job).get(list_jobs))
        .route("/api/tenants/{tenant_id}/jobs/stats", get(job_stats))
        .route("/api/tenants/{tenant_id}/jobs/{id}", get(get_job))
        .route("/api/tenants/{tenant_id}/jobs/{id}/cancel", post(cancel_job))
}

async fn enqueue_job(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(request): Json<EnqueueJobRequest>,
) -> Result<(StatusCode, Json<Job>), StatusCode> {
    if request.job_type.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let job = state
        .jobs
        .enqueue(&tenant_id, &request.job_type, request.payload, request.options)
        .await
        .map_err(|e| queue_status(&e))?;

    Ok((StatusCode::CREATED, Json(job)))
}

/// GET /api/tenants/{tenant_id}/jobs?queue=&status=&job_type=&limit=&offset=
async fn list_jobs(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Query(filter): Query<JobFilter>,
) -> Result<Json<Value>, StatusCode> {
    let jobs = state
        .jobs
        .list_jobs(&tenant_id, &filter)
        .await
        .map_err(|e| queue_status(&e))?;

    Ok(Json(json!({ "jobs": jobs })))
}

async fn get_job(
    State(state): State<AppState>,
    Path((tenant_id, id)): Path<(String, String)>,
) -> Result<Json<Job>, StatusCode> {
    match state.jobs.get_job(&tenant_id, &id).await {
        Ok(Some(job)) => Ok(Json(job)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => Err(queue_status(&e)),
    }
}

async fn cancel_job(
    State(state): State<AppState>,
    Path((tenant_id, id)): Path<(String, String)>,
) -> Result<Json<Value>, StatusCode> {
    state
        .jobs
        .cancel(&tenant_id, &id)
        .await
        .map_err(|e| queue_status(&e))?;

    Ok(Json(json!({ "id": id, "status": "cancelled" })))
}

async fn job_stats(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<Json<JobStats>, StatusCode> {
    state
        .jobs
        .get_stats(&tenant_id)
        .await
        .map(Json)
        .map_err(|e| queue_status(&e))
}
