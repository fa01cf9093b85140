/// SQLite persistence layer for workflows and their executions
///
/// Every query is scoped by tenant except the startup scan for scheduled
/// workflows, which loads all tenants at once.

use crate::db::{from_millis, from_millis_opt, to_millis};
use crate::error::EngineError;
use crate::workflow::types::{
    ExecutionStatus, TriggerConfig, TriggerType, Workflow, WorkflowExecution,
};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

type Result<T> = std::result::Result<T, EngineError>;

/// SQLite-based workflow storage manager
#[derive(Debug, Clone)]
pub struct WorkflowStorage {
    pool: SqlitePool,
}

const WORKFLOW_COLUMNS: &str = "id, tenant_id, name, description, trigger_type, trigger_config, \
    conditions, actions, is_active, created_at, updated_at";

const EXECUTION_COLUMNS: &str = "id, workflow_id, tenant_id, trigger_data, status, actions_completed, \
    actions_failed, execution_log, error_message, started_at, completed_at, duration_ms";

impl WorkflowStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert_workflow(&self, workflow: &Workflow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workflows
                (id, tenant_id, name, description, trigger_type, trigger_config,
                 conditions, actions, is_active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&workflow.id)
        .bind(&workflow.tenant_id)
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(workflow.trigger_type.as_str())
        .bind(serde_json::to_string(&workflow.trigger_config)?)
        .bind(serde_json::to_string(&workflow.conditions)?)
        .bind(serde_json::to_string(&workflow.actions)?)
        .bind(workflow.is_active)
        .bind(to_millis(workflow.created_at))
        .bind(to_millis(workflow.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn update_workflow(&self, workflow: &Workflow) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE workflows SET
                name = ?, description = ?, trigger_type = ?, trigger_config = ?,
                conditions = ?, actions = ?, is_active = ?, updated_at = ?
            WHERE id = ? AND tenant_id = ?
            "#,
        )
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(workflow.trigger_type.as_str())
        .bind(serde_json::to_string(&workflow.trigger_config)?)
        .bind(serde_json::to_string(&workflow.conditions)?)
        .bind(serde_json::to_string(&workflow.actions)?)
        .bind(workflow.is_active)
        .bind(to_millis(workflow.updated_at))
        .bind(&workflow.id)
        .bind(&workflow.tenant_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get_workflow(&self, tenant_id: &str, id: &str) -> Result<Option<Workflow>> {
        let sql = format!("SELECT {} FROM workflows WHERE id = ? AND tenant_id = ?", WORKFLOW_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| workflow_from_row(&r)).transpose()
    }

    pub async fn list_workflows(&self, tenant_id: &str) -> Result<Vec<Workflow>> {
        let sql = format!(
            "SELECT {} FROM workflows WHERE tenant_id = ? ORDER BY created_at DESC",
            WORKFLOW_COLUMNS
        );
        let rows = sqlx::query(&sql).bind(tenant_id).fetch_all(&self.pool).await?;

        rows.iter().map(workflow_from_row).collect()
    }

    pub async fn delete_workflow(&self, tenant_id: &str, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = ? AND tenant_id = ?")
            .bind(id)
            .bind(tenant_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Active scheduled workflows of every tenant (scheduler bootstrap)
    pub async fn find_active_scheduled(&self) -> Result<Vec<Workflow>> {
        let sql = format!(
            "SELECT {} FROM workflows WHERE is_active = 1 AND trigger_type = 'scheduled'",
            WORKFLOW_COLUMNS
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        rows.iter().map(workflow_from_row).collect()
    }

    pub async fn find_active_event_workflows(&self, tenant_id: &str) -> Result<Vec<Workflow>> {
        let sql = format!(
            "SELECT {} FROM workflows WHERE tenant_id = ? AND is_active = 1 AND trigger_type = 'event'",
            WORKFLOW_COLUMNS
        );
        let rows = sqlx::query(&sql).bind(tenant_id).fetch_all(&self.pool).await?;

        rows.iter().map(workflow_from_row).collect()
    }

    pub async fn insert_execution(&self, execution: &WorkflowExecution) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_executions
                (id, workflow_id, tenant_id, trigger_data, status, actions_completed,
                 actions_failed, execution_log, error_message, started_at, completed_at, duration_ms)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&execution.id)
        .bind(&execution.workflow_id)
        .bind(&execution.tenant_id)
        .bind(serde_json::to_string(&execution.trigger_data)?)
        .bind(execution.status.as_str())
        .bind(execution.actions_completed as i64)
        .bind(execution.actions_failed as i64)
        .bind(serde_json::to_string(&execution.execution_log)?)
        .bind(&execution.error_message)
        .bind(to_millis(execution.started_at))
        .bind(execution.completed_at.map(to_millis))
        .bind(execution.duration_ms)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Terminal write of an execution record
    pub async fn finalize_execution(&self, execution: &WorkflowExecution) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE workflow_executions SET
                status = ?, actions_completed = ?, actions_failed = ?, execution_log = ?,
                error_message = ?, completed_at = ?, duration_ms = ?
            WHERE id = ?
            "#,
        )
        .bind(execution.status.as_str())
        .bind(execution.actions_completed as i64)
        .bind(execution.actions_failed as i64)
        .bind(serde_json::to_string(&execution.execution_log)?)
        .bind(&execution.error_message)
        .bind(execution.completed_at.map(to_millis))
        .bind(execution.duration_ms)
        .bind(&execution.id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_execution(&self, tenant_id: &str, id: &str) -> Result<Option<WorkflowExecution>> {
        let sql = format!(
            "SELECT {} FROM workflow_executions WHERE id = ? AND tenant_id = ?",
            EXECUTION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| execution_from_row(&r)).transpose()
    }

    /// Newest first
    pub async fn list_executions(
        &self,
        tenant_id: &str,
        workflow_id: &str,
        limit: i64,
    ) -> Result<Vec<WorkflowExecution>> {
        let sql = format!(
            "SELECT {} FROM workflow_executions WHERE tenant_id = ? AND workflow_id = ? \
             ORDER BY started_at DESC, rowid DESC LIMIT ?",
            EXECUTION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(tenant_id)
            .bind(workflow_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(execution_from_row).collect()
    }
}

fn workflow_from_row(row: &SqliteRow) -> Result<Workflow> {
    let trigger_type: String = row.try_get("trigger_type")?;
    let trigger_config: String = row.try_get("trigger_config")?;
    let conditions: String = row.try_get("conditions")?;
    let actions: String = row.try_get("actions")?;

    Ok(Workflow {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        trigger_type: TriggerType::parse(&trigger_type).ok_or_else(|| {
            EngineError::CorruptDefinition(format!("unknown trigger type '{}'", trigger_type))
        })?,
        trigger_config: serde_json::from_str::<TriggerConfig>(&trigger_config)?,
        // Kept undecoded; a corrupt document surfaces when the workflow runs
        conditions: serde_json::from_str(&conditions).unwrap_or(serde_json::Value::String(conditions)),
        actions: serde_json::from_str(&actions).unwrap_or(serde_json::Value::String(actions)),
        is_active: row.try_get("is_active")?,
        created_at: from_millis(row.try_get("created_at")?),
        updated_at: from_millis(row.try_get("updated_at")?),
    })
}

fn execution_from_row(row: &SqliteRow) -> Result<WorkflowExecution> {
    let status: String = row.try_get("status")?;
    let trigger_data: String = row.try_get("trigger_data")?;
    let execution_log: String = row.try_get("execution_log")?;
    let id: String = row.try_get("id")?;

    Ok(WorkflowExecution {
        workflow_id: row.try_get("workflow_id")?,
        tenant_id: row.try_get("tenant_id")?,
        trigger_data: serde_json::from_str(&trigger_data)?,
        status: ExecutionStatus::parse(&status).ok_or_else(|| {
            EngineError::CorruptDefinition(format!("execution {} has unknown status '{}'", id, status))
        })?,
        actions_completed: action_count(row, &id, "actions_completed")?,
        actions_failed: action_count(row, &id, "actions_failed")?,
        execution_log: serde_json::from_str(&execution_log)?,
        error_message: row.try_get("error_message")?,
        started_at: from_millis(row.try_get("started_at")?),
        completed_at: from_millis_opt(row.try_get("completed_at")?),
        duration_ms: row.try_get("duration_ms")?,
        id,
    })
}

fn action_count(row: &SqliteRow, id: &str, column: &str) -> Result<u32> {
    let count: i64 = row.try_get(column)?;
    u32::try_from(count)
        .map_err(|_| EngineError::CorruptDefinition(format!("execution {} has {} = {}", id, column, count)))
}
