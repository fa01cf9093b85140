/// Event publication endpoint

use crate::api::{engine_status, parse_trigger_data, AppState};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::post,
    Router,
};
use serde_json::{json, Value};

pub fn create_event_routes() -> Router<AppState> {
    Router::new().route("/api/tenants/{tenant_id}/events/{event_name}", post(publish_event))
}

/// POST /api/tenants/{tenant_id}/events/{event_name}
///
/// Body: JSON object handed to every matching workflow as trigger data
async fn publish_event(
    State(state): State<AppState>,
    Path((tenant_id, event_name)): Path<(String, String)>,
    body: String,
) -> Result<(StatusCode, Json<Value>), StatusCode> {
    let data = parse_trigger_data(&body)?;

    let started = state
        .engine
        .handle_event(&tenant_id, &event_name, data, Some(state.execution_timeout))
        .await
        .map_err(|e| engine_status(&e))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "event": event_name, "workflows_started": started })),
    ))
}
