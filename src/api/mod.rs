/// HTTP API Layer
///
/// Thin axum surface over the engine and the job queue. Every route is scoped
/// by the tenant in its path:
/// - Workflow CRUD, manual execution and execution history
/// - Event publication (fan-out to matching event workflows)
/// - Job enqueue, inspection, cancellation and statistics

use crate::error::{EngineError, QueueError, SchedulerError};
use crate::queue::JobQueue;
use crate::runtime::WorkflowEngine;
use crate::workflow::types::TriggerData;
use axum::http::StatusCode;
use axum::Router;
use std::sync::Arc;
use std::time::Duration;

// Workflow management and execution endpoints
pub mod workflows;

// Event publication endpoint
pub mod events;

// Job queue endpoints
pub mod jobs;

/// Shared state of every handler
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<WorkflowEngine>,
    pub jobs: JobQueue,
    /// Wall-clock deadline of runs started over HTTP
    pub execution_timeout: Duration,
}

/// All API routes, ready to be given their state
pub fn create_api_routes() -> Router<AppState> {
    Router::new()
        .merge(workflows::create_workflow_routes())
        .merge(events::create_event_routes())
        .merge(jobs::create_job_routes())
}

/// Parse an optional JSON object body; an empty body is an empty map
pub(crate) fn parse_trigger_data(body: &str) -> Result<TriggerData, StatusCode> {
    if body.trim().is_empty() {
        return Ok(TriggerData::new());
    }

    serde_json::from_str(body).map_err(|e| {
        tracing::warn!("❌ Invalid JSON trigger data: {}", e);
        StatusCode::BAD_REQUEST
    })
}

pub(crate) fn engine_status(error: &EngineError) -> StatusCode {
    match error {
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::Validation(_) | EngineError::Scheduler(SchedulerError::InvalidCron { .. }) => {
            tracing::warn!("❌ Rejected request: {}", error);
            StatusCode::BAD_REQUEST
        }
        _ => {
            tracing::error!("❌ Engine error: {}", error);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub(crate) fn queue_status(error: &QueueError) -> StatusCode {
    match error {
        QueueError::NotFound(_) => StatusCode::NOT_FOUND,
        QueueError::NotCancellable(_) => StatusCode::CONFLICT,
        _ => {
            tracing::error!("❌ Queue error: {}", error);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
