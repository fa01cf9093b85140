/// Built-in job handlers

use crate::queue::registry::JobHandler;
use crate::queue::types::Job;
use crate::runtime::WorkflowEngine;
use crate::workflow::types::TriggerData;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Job type of deferred workflow runs
pub const WORKFLOW_EXECUTE: &str = "workflow.execute";

#[derive(Debug, Deserialize)]
struct WorkflowJobPayload {
    #[serde(default)]
    tenant_id: Option<String>,
    workflow_id: String,
    #[serde(default)]
    trigger_data: TriggerData,
}

/// Runs a stored workflow from a queued job
///
/// The job's own tenant is authoritative; a payload naming another tenant is
/// rejected.
pub struct WorkflowJobHandler {
    engine: Arc<WorkflowEngine>,
}

impl WorkflowJobHandler {
    pub fn new(engine: Arc<WorkflowEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl JobHandler for WorkflowJobHandler {
    async fn handle(&self, job: &Job) -> anyhow::Result<Option<Value>> {
        let payload: WorkflowJobPayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| anyhow::anyhow!("invalid {} payload: {}", WORKFLOW_EXECUTE, e))?;

        if let Some(tenant_id) = payload.tenant_id.as_deref() {
            if tenant_id != job.tenant_id {
                anyhow::bail!("payload tenant {} does not own job {}", tenant_id, job.id);
            }
        }

        let execution = self
            .engine
            .execute_workflow(&job.tenant_id, &payload.workflow_id, payload.trigger_data, None)
            .await?;

        Ok(Some(json!({
            "execution_id": execution.id,
            "status": execution.status,
            "actions_completed": execution.actions_completed,
            "actions_failed": execution.actions_failed,
        })))
    }
}
