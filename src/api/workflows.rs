/// Workflow management REST API endpoints
///
/// CRUD changes go through the engine so the cron scheduler stays in step with
/// what is stored.

use crate::api::{engine_status, parse_trigger_data, AppState};
use crate::workflow::types::{CreateWorkflowRequest, UpdateWorkflowRequest, Workflow, WorkflowExecution};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

const DEFAULT_HISTORY_LIMIT: i64 = 50;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

pub fn create_workflow_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/tenants/{tenant_id}/workflows",
            post(create_workflow).get(list_workflows),
        )
        .route(
            "/api/tenants/{tenant_id}/workflows/{id}",
            get(get_workflow).put(update_workflow).delete(delete_workflow),
        )
        .route("/api/tenants/{tenant_id}/workflows/{id}/execute", post(execute_workflow))
        .route("/api/tenants/{tenant_id}/workflows/{id}/executions", get(list_executions))
        .route("/api/tenants/{tenant_id}/executions/{id}", get(get_execution))
}

/// POST /api/tenants/{tenant_id}/workflows
async fn create_workflow(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(request): Json<CreateWorkflowRequest>,
) -> Result<(StatusCode, Json<Workflow>), StatusCode> {
    let workflow = state
        .engine
        .create_workflow(&tenant_id, request)
        .await
        .map_err(|e| engine_status(&e))?;

    Ok((StatusCode::CREATED, Json(workflow)))
}

async fn list_workflows(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let workflows = state
        .engine
        .list_workflows(&tenant_id)
        .await
        .map_err(|e| engine_status(&e))?;

    Ok(Json(json!({ "workflows": workflows })))
}

async fn get_workflow(
    State(state): State<AppState>,
    Path((tenant_id, id)): Path<(String, String)>,
) -> Result<Json<Workflow>, StatusCode> {
    state
        .engine
        .get_workflow(&tenant_id, &id)
        .await
        .map(Json)
        .map_err(|e| engine_status(&e))
}

/// PUT /api/tenants/{tenant_id}/workflows/{id}
///
/// Partial update: omitted fields keep their stored value.
async fn update_workflow(
    State(state): State<AppState>,
    Path((tenant_id, id)): Path<(String, String)>,
    Json(request): Json<UpdateWorkflowRequest>,
) -> Result<Json<Workflow>, StatusCode> {
    state
        .engine
        .update_workflow(&tenant_id, &id, request)
        .await
        .map(Json)
        .map_err(|e| engine_status(&e))
}

async fn delete_workflow(
    State(state): State<AppState>,
    Path((tenant_id, id)): Path<(String, String)>,
) -> Result<Json<Value>, StatusCode> {
    state
        .engine
        .delete_workflow(&tenant_id, &id)
        .await
        .map_err(|e| engine_status(&e))?;

    Ok(Json(json!({ "message": "Workflow deleted successfully" })))
}

/// POST /api/tenants/{tenant_id}/workflows/{id}/execute
///
/// Acknowledges that the run started; its outcome is read from the execution
/// history.
async fn execute_workflow(
    State(state): State<AppState>,
    Path((tenant_id, id)): Path<(String, String)>,
    body: String,
) -> Result<(StatusCode, Json<Value>), StatusCode> {
    let trigger_data = parse_trigger_data(&body)?;
    let workflow = state
        .engine
        .get_workflow(&tenant_id, &id)
        .await
        .map_err(|e| engine_status(&e))?;

    tracing::info!("▶️ Manual execution requested for workflow {}", id);

    let engine = state.engine.clone();
    let timeout = state.execution_timeout;
    tokio::spawn(async move {
        if let Err(e) = engine.run(workflow, trigger_data, Some(timeout)).await {
            tracing::error!("❌ Manual execution of workflow {} failed: {}", id, e);
        }
    });

    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "started" }))))
}

async fn list_executions(
    State(state): State<AppState>,
    Path((tenant_id, id)): Path<(String, String)>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Value>, StatusCode> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, 500);
    let executions = state
        .engine
        .list_executions(&tenant_id, &id, limit)
        .await
        .map_err(|e| engine_status(&e))?;

    Ok(Json(json!({ "executions": executions })))
}

async fn get_execution(
    State(state): State<AppState>,
    Path((tenant_id, id)): Path<(String, String)>,
) -> Result<Json<WorkflowExecution>, StatusCode> {
    match state.engine.get_execution(&tenant_id, &id).await {
        Ok(Some(execution)) => Ok(Json(execution)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => Err(engine_status(&e)),
    }
}
