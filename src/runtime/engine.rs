/// Workflow execution engine
///
/// Runs a workflow definition end to end and keeps the cron scheduler in step
/// with workflow CRUD. A run goes `running → completed | failed`:
/// - conditions that do not match finish the run as `completed` with no actions
/// - actions run strictly in order; a failing action is logged and counted but
///   never stops the ones after it
/// - only a corrupt definition, a condition error or an aborted run is `failed`
///
/// The whole run, including its terminal write, lives on its own task so a
/// caller giving up on the result cannot leave the record in `running`.
/// Giving up does stop the run: the action in flight is interrupted, nothing
/// after it starts, and the record is finalized as `failed`.

use crate::error::{ActionError, EngineError};
use crate::runtime::condition;
use crate::runtime::executor::{Action, ActionExecutor};
use crate::runtime::scheduler::{schedule_callback, CronScheduler, ScheduleCallback};
use crate::workflow::storage::WorkflowStorage;
use crate::workflow::types::{
    ActionSpec, CreateWorkflowRequest, ExecutionLogEntry, ExecutionStatus, LogStep, TriggerConfig,
    TriggerData, TriggerType, UpdateWorkflowRequest, Workflow, WorkflowExecution,
};
use chrono::Utc;
use serde_json::Value;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

type Result<T> = std::result::Result<T, EngineError>;

pub struct WorkflowEngine {
    storage: WorkflowStorage,
    executor: Arc<ActionExecutor>,
    scheduler: Arc<CronScheduler>,
}

/// What the condition/action phase produced
struct RunOutcome {
    actions_completed: u32,
    actions_failed: u32,
    log: Vec<ExecutionLogEntry>,
    failure: Option<EngineError>,
}

impl RunOutcome {
    fn new() -> Self {
        Self {
            actions_completed: 0,
            actions_failed: 0,
            log: Vec::new(),
            failure: None,
        }
    }
}

impl WorkflowEngine {
    pub fn new(storage: WorkflowStorage, executor: Arc<ActionExecutor>, scheduler: Arc<CronScheduler>) -> Self {
        Self {
            storage,
            executor,
            scheduler,
        }
    }

    pub fn storage(&self) -> &WorkflowStorage {
        &self.storage
    }

    pub fn scheduler(&self) -> &Arc<CronScheduler> {
        &self.scheduler
    }

    /// Register every active scheduled workflow (startup)
    ///
    /// A workflow with a bad cron expression is logged and skipped.
    pub async fn load_schedules(self: &Arc<Self>) -> Result<usize> {
        let workflows = self.storage.find_active_scheduled().await?;
        let mut registered = 0;

        for workflow in &workflows {
            let Some(expression) = workflow.active_schedule() else {
                tracing::warn!("⚠️ Scheduled workflow {} has no cron expression", workflow.id);
                continue;
            };
            match self
                .scheduler
                .add_workflow(&workflow.id, expression, self.fire_callback(&workflow.tenant_id, &workflow.id))
                .await
            {
                Ok(()) => registered += 1,
                Err(e) => tracing::error!("❌ Workflow {} is unschedulable: {}", workflow.id, e),
            }
        }

        tracing::info!("📊 Registered {} of {} scheduled workflows", registered, workflows.len());
        Ok(registered)
    }

    pub async fn create_workflow(self: &Arc<Self>, tenant_id: &str, request: CreateWorkflowRequest) -> Result<Workflow> {
        validate_definition(&request.name, request.trigger_type, &request.trigger_config, &request.actions)?;

        let now = Utc::now();
        let workflow = Workflow {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            name: request.name,
            description: request.description,
            trigger_type: request.trigger_type,
            trigger_config: request.trigger_config,
            conditions: serde_json::to_value(&request.conditions)?,
            actions: serde_json::to_value(&request.actions)?,
            is_active: request.is_active,
            created_at: now,
            updated_at: now,
        };

        // Register first so an invalid expression never reaches storage
        if let Some(expression) = workflow.active_schedule() {
            self.scheduler
                .add_workflow(&workflow.id, expression, self.fire_callback(tenant_id, &workflow.id))
                .await?;
        }

        if let Err(e) = self.storage.insert_workflow(&workflow).await {
            self.scheduler.remove_workflow(&workflow.id).await;
            return Err(e);
        }

        tracing::info!("🔥 Created workflow: {} ({})", workflow.id, workflow.name);
        Ok(workflow)
    }

    /// Apply a partial update, touching the schedule only when scheduling changes
    pub async fn update_workflow(
        self: &Arc<Self>,
        tenant_id: &str,
        id: &str,
        request: UpdateWorkflowRequest,
    ) -> Result<Workflow> {
        let existing = self
            .storage
            .get_workflow(tenant_id, id)
            .await?
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;

        let mut updated = existing.clone();
        if let Some(name) = request.name {
            updated.name = name;
        }
        if let Some(description) = request.description {
            updated.description = description;
        }
        if let Some(trigger_type) = request.trigger_type {
            updated.trigger_type = trigger_type;
        }
        if let Some(trigger_config) = request.trigger_config {
            updated.trigger_config = trigger_config;
        }
        if let Some(conditions) = request.conditions {
            updated.conditions = serde_json::to_value(&conditions)?;
        }
        if let Some(actions) = request.actions {
            updated.actions = serde_json::to_value(&actions)?;
        }
        if let Some(is_active) = request.is_active {
            updated.is_active = is_active;
        }
        updated.updated_at = Utc::now();

        let actions = updated.parse_actions().map_err(|e| EngineError::Validation(e.to_string()))?;
        validate_definition(&updated.name, updated.trigger_type, &updated.trigger_config, &actions)?;

        let rescheduled = match (existing.active_schedule(), updated.active_schedule()) {
            (Some(_), None) => {
                self.scheduler.remove_workflow(id).await;
                true
            }
            (None, Some(expression)) => {
                self.scheduler
                    .add_workflow(id, expression, self.fire_callback(tenant_id, id))
                    .await?;
                true
            }
            (Some(before), Some(after)) if before != after => {
                self.scheduler
                    .add_workflow(id, after, self.fire_callback(tenant_id, id))
                    .await?;
                true
            }
            _ => false,
        };

        match self.storage.update_workflow(&updated).await {
            Ok(true) => {}
            Ok(false) => {
                self.scheduler.remove_workflow(id).await;
                return Err(EngineError::NotFound(id.to_string()));
            }
            Err(e) => {
                if rescheduled {
                    self.restore_schedule(&existing).await;
                }
                return Err(e);
            }
        }

        tracing::info!("🔥 Updated workflow: {} ({})", updated.id, updated.name);
        Ok(updated)
    }

    /// Put the scheduler back to what a stored workflow asks for
    async fn restore_schedule(self: &Arc<Self>, workflow: &Workflow) {
        match workflow.active_schedule() {
            Some(expression) => {
                let callback = self.fire_callback(&workflow.tenant_id, &workflow.id);
                if let Err(e) = self.scheduler.add_workflow(&workflow.id, expression, callback).await {
                    tracing::error!("❌ Could not restore schedule of workflow {}: {}", workflow.id, e);
                }
            }
            None => {
                self.scheduler.remove_workflow(&workflow.id).await;
            }
        }
    }

    /// Unschedule, then delete
    pub async fn delete_workflow(&self, tenant_id: &str, id: &str) -> Result<()> {
        if self.storage.get_workflow(tenant_id, id).await?.is_none() {
            return Err(EngineError::NotFound(id.to_string()));
        }

        self.scheduler.remove_workflow(id).await;

        if !self.storage.delete_workflow(tenant_id, id).await? {
            return Err(EngineError::NotFound(id.to_string()));
        }

        tracing::info!("🗑️ Deleted workflow: {}", id);
        Ok(())
    }

    pub async fn get_workflow(&self, tenant_id: &str, id: &str) -> Result<Workflow> {
        self.storage
            .get_workflow(tenant_id, id)
            .await?
            .ok_or_else(|| EngineError::NotFound(id.to_string()))
    }

    pub async fn list_workflows(&self, tenant_id: &str) -> Result<Vec<Workflow>> {
        self.storage.list_workflows(tenant_id).await
    }

    pub async fn list_executions(&self, tenant_id: &str, workflow_id: &str, limit: i64) -> Result<Vec<WorkflowExecution>> {
        self.storage.list_executions(tenant_id, workflow_id, limit).await
    }

    pub async fn get_execution(&self, tenant_id: &str, execution_id: &str) -> Result<Option<WorkflowExecution>> {
        self.storage.get_execution(tenant_id, execution_id).await
    }

    /// Run a workflow manually and wait for its execution record
    pub async fn execute_workflow(
        self: &Arc<Self>,
        tenant_id: &str,
        workflow_id: &str,
        trigger_data: TriggerData,
        timeout: Option<Duration>,
    ) -> Result<WorkflowExecution> {
        let workflow = self.get_workflow(tenant_id, workflow_id).await?;
        self.run(workflow, trigger_data, timeout).await
    }

    /// Fan an event out to every matching active event workflow of a tenant
    ///
    /// Each match runs on its own task; returns how many were started.
    pub async fn handle_event(
        self: &Arc<Self>,
        tenant_id: &str,
        event_name: &str,
        data: TriggerData,
        timeout: Option<Duration>,
    ) -> Result<usize> {
        let workflows = self.storage.find_active_event_workflows(tenant_id).await?;
        let mut started = 0;

        for workflow in workflows.into_iter().filter(|w| w.matches_event(event_name)) {
            let engine = Arc::clone(self);
            let mut trigger_data = data.clone();
            trigger_data
                .entry("event")
                .or_insert_with(|| Value::String(event_name.to_string()));
            let workflow_id = workflow.id.clone();

            tokio::spawn(async move {
                if let Err(e) = engine.run(workflow, trigger_data, timeout).await {
                    tracing::error!("❌ Event-triggered workflow {} failed: {}", workflow_id, e);
                }
            });
            started += 1;
        }

        tracing::info!("📣 Event '{}' for tenant {} started {} workflow(s)", event_name, tenant_id, started);
        Ok(started)
    }

    /// Execute a workflow definition and persist its execution record
    ///
    /// Returns the finalized record, or the run-level error after the record
    /// has been written as `failed`.
    pub async fn run(
        self: &Arc<Self>,
        workflow: Workflow,
        trigger_data: TriggerData,
        timeout: Option<Duration>,
    ) -> Result<WorkflowExecution> {
        let engine = Arc::clone(self);
        // Dropped with this future; the run treats that as cancellation
        let (_cancel, cancelled) = oneshot::channel::<()>();
        tokio::spawn(async move {
            engine
                .run_to_completion(workflow, trigger_data, timeout, cancelled)
                .await
        })
        .await
            .map_err(|e| EngineError::Aborted(e.to_string()))?
    }

    async fn run_to_completion(
        &self,
        workflow: Workflow,
        trigger_data: TriggerData,
        timeout: Option<Duration>,
        cancelled: oneshot::Receiver<()>,
    ) -> Result<WorkflowExecution> {
        let started = Instant::now();
        let mut execution = WorkflowExecution {
            id: Uuid::new_v4().to_string(),
            workflow_id: workflow.id.clone(),
            tenant_id: workflow.tenant_id.clone(),
            trigger_data: trigger_data.clone(),
            status: ExecutionStatus::Running,
            actions_completed: 0,
            actions_failed: 0,
            execution_log: Vec::new(),
            error_message: None,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
        };
        self.storage.insert_execution(&execution).await?;

        let span = tracing::info_span!(
            "workflow_execution",
            tenant_id = %workflow.tenant_id,
            workflow_id = %workflow.id,
            execution_id = %execution.id,
        );
        tracing::info!(parent: &span, "🚀 Starting workflow execution: {} ({})", workflow.id, workflow.name);

        let deadline = timeout.map(|t| started + t);
        let executor = Arc::clone(&self.executor);
        let steps = tokio::spawn(
            run_steps(executor, workflow, trigger_data, deadline, cancelled).instrument(span.clone()),
        );

        let outcome = match steps.await {
            Ok(outcome) => outcome,
            Err(e) => {
                let mut outcome = RunOutcome::new();
                outcome.failure = Some(EngineError::Aborted(e.to_string()));
                outcome
            }
        };

        execution.actions_completed = outcome.actions_completed;
        execution.actions_failed = outcome.actions_failed;
        execution.execution_log = outcome.log;
        execution.status = if outcome.failure.is_some() {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Completed
        };
        execution.error_message = outcome.failure.as_ref().map(|e| e.to_string());
        execution.completed_at = Some(Utc::now());
        execution.duration_ms = Some(started.elapsed().as_millis() as i64);

        self.storage.finalize_execution(&execution).await?;

        let _enter = span.enter();
        match outcome.failure {
            Some(err) => {
                tracing::error!("❌ Workflow execution failed: {}", err);
                Err(err)
            }
            None => {
                tracing::info!(
                    "🎉 Workflow execution completed in {}ms ({} ok, {} failed)",
                    execution.duration_ms.unwrap_or_default(),
                    execution.actions_completed,
                    execution.actions_failed
                );
                Ok(execution)
            }
        }
    }

    /// Scheduler callback: re-read the workflow, then run it on its own task
    fn fire_callback(self: &Arc<Self>, tenant_id: &str, workflow_id: &str) -> ScheduleCallback {
        let engine: Weak<Self> = Arc::downgrade(self);
        let tenant_id = tenant_id.to_string();
        let workflow_id = workflow_id.to_string();

        schedule_callback(move || {
            let engine = engine.clone();
            let tenant_id = tenant_id.clone();
            let workflow_id = workflow_id.clone();

            async move {
                let Some(engine) = engine.upgrade() else {
                    return;
                };

                let workflow = match engine.storage.get_workflow(&tenant_id, &workflow_id).await {
                    Ok(Some(workflow)) if workflow.active_schedule().is_some() => workflow,
                    Ok(_) => {
                        tracing::debug!("⏭️ Skipping cron fire for inactive or deleted workflow: {}", workflow_id);
                        return;
                    }
                    Err(e) => {
                        tracing::error!("❌ Failed to load scheduled workflow {}: {}", workflow_id, e);
                        return;
                    }
                };

                let mut trigger_data = TriggerData::new();
                trigger_data.insert("trigger_type".into(), Value::String("scheduled".into()));
                trigger_data.insert("triggered_at".into(), Value::String(Utc::now().to_rfc3339()));

                tokio::spawn(async move {
                    if let Err(e) = engine.run(workflow, trigger_data, None).await {
                        tracing::error!("❌ Cron-triggered workflow {} failed: {}", workflow_id, e);
                    }
                });
            }
        })
    }
}

/// Conditions, then every action in order
async fn run_steps(
    executor: Arc<ActionExecutor>,
    workflow: Workflow,
    mut context: TriggerData,
    deadline: Option<Instant>,
    mut cancelled: oneshot::Receiver<()>,
) -> RunOutcome {
    let mut outcome = RunOutcome::new();

    let conditions = match workflow.parse_conditions() {
        Ok(conditions) => conditions,
        Err(e) => {
            outcome.log.push(log_entry(LogStep::Conditions, None, None, Err(e.to_string())));
            outcome.failure = Some(e);
            return outcome;
        }
    };

    match condition::evaluate(&conditions, &context) {
        Ok(true) => {
            outcome.log.push(log_entry(
                LogStep::Conditions,
                None,
                None,
                Ok(format!("{} condition(s) passed", conditions.len())),
            ));
        }
        Ok(false) => {
            tracing::info!("⏭️ Conditions not met, skipping actions");
            outcome
                .log
                .push(log_entry(LogStep::Conditions, None, None, Ok("conditions not met".into())));
            return outcome;
        }
        Err(e) => {
            outcome.log.push(log_entry(LogStep::Conditions, None, None, Err(e.to_string())));
            outcome.failure = Some(e.into());
            return outcome;
        }
    }

    let actions = match workflow.parse_actions() {
        Ok(actions) => actions,
        Err(e) => {
            outcome.log.push(log_entry(LogStep::Action, None, None, Err(e.to_string())));
            outcome.failure = Some(e);
            return outcome;
        }
    };

    for (index, spec) in actions.iter().enumerate() {
        tracing::info!("📍 Step {}/{}: {}", index + 1, actions.len(), spec.action_type);

        let step = async {
            match deadline {
                Some(deadline) if Instant::now() >= deadline => Err(ActionError::DeadlineExceeded),
                Some(deadline) => tokio::time::timeout_at(deadline, executor.execute(spec, &mut context))
                    .await
                    .unwrap_or(Err(ActionError::DeadlineExceeded)),
                None => executor.execute(spec, &mut context).await,
            }
        };

        let result = tokio::select! {
            result = step => result,
            _ = &mut cancelled => {
                tracing::warn!("🛑 Run cancelled during action {} ({})", index, spec.action_type);
                outcome.actions_failed += 1;
                outcome.log.push(log_entry(
                    LogStep::Action,
                    Some(index),
                    Some(&spec.action_type),
                    Err("run cancelled".into()),
                ));
                outcome.failure = Some(EngineError::Aborted("run cancelled before it finished".into()));
                return outcome;
            }
        };

        match result {
            Ok(summary) => {
                outcome.actions_completed += 1;
                outcome
                    .log
                    .push(log_entry(LogStep::Action, Some(index), Some(&spec.action_type), Ok(summary)));
            }
            Err(e) => {
                tracing::warn!("⚠️ Action {} ({}) failed: {}", index, spec.action_type, e);
                outcome.actions_failed += 1;
                outcome.log.push(log_entry(
                    LogStep::Action,
                    Some(index),
                    Some(&spec.action_type),
                    Err(e.to_string()),
                ));
            }
        }
    }

    outcome
}

fn log_entry(
    step: LogStep,
    action_index: Option<usize>,
    action_type: Option<&str>,
    result: std::result::Result<String, String>,
) -> ExecutionLogEntry {
    let (success, message, error) = match result {
        Ok(message) => (true, message, None),
        Err(error) => (false, "failed".to_string(), Some(error)),
    };

    ExecutionLogEntry {
        timestamp: Utc::now(),
        step,
        action_index,
        action_type: action_type.map(str::to_string),
        success,
        message,
        error,
    }
}

/// Save-time checks on a workflow definition
fn validate_definition(
    name: &str,
    trigger_type: TriggerType,
    trigger_config: &TriggerConfig,
    actions: &[ActionSpec],
) -> Result<()> {
    if name.trim().is_empty() {
        return Err(EngineError::Validation("name is required".into()));
    }

    match trigger_type {
        TriggerType::Event if trigger_config.event_name.as_deref().unwrap_or("").is_empty() => {
            return Err(EngineError::Validation("event trigger requires event_name".into()));
        }
        TriggerType::Scheduled if trigger_config.cron_expression.as_deref().unwrap_or("").is_empty() => {
            return Err(EngineError::Validation("scheduled trigger requires cron_expression".into()));
        }
        _ => {}
    }

    for (index, spec) in actions.iter().enumerate() {
        Action::decode(spec).map_err(|e| EngineError::Validation(format!("action {}: {}", index, e)))?;
    }

    Ok(())
}
