/// Core workflow type definitions
///
/// Workflows are tenant-scoped automation rules: a trigger, a list of
/// conditions checked against the trigger data, and an ordered list of actions.
/// Conditions and actions are persisted as JSON documents and decoded at run
/// time, so a corrupt stored definition fails the run instead of the lookup.

use crate::error::EngineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// String-keyed trigger data shared by conditions and actions
///
/// Conventional keys: `session_id`, `from`, plus event-specific fields such as
/// `transaction_id` or `total_amount`. Actions may add keys (`llm_response`).
pub type TriggerData = Map<String, Value>;

/// What starts a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// Fired by a named business event (e.g. "transaction_created")
    Event,
    /// Fired by a cron schedule (second granularity)
    Scheduled,
    /// Only fired through the execute API
    Manual,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Event => "event",
            TriggerType::Scheduled => "scheduled",
            TriggerType::Manual => "manual",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "event" => Some(TriggerType::Event),
            "scheduled" => Some(TriggerType::Scheduled),
            "manual" => Some(TriggerType::Manual),
            _ => None,
        }
    }
}

/// Trigger parameters; which field matters depends on the trigger type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Event name pattern for `event` triggers ("order_paid", "order_*", "*")
    #[serde(default, alias = "event", skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
    /// Six-field cron expression for `scheduled` triggers ("0 0 9 * * *")
    #[serde(default, alias = "cron", alias = "schedule", skip_serializing_if = "Option::is_none")]
    pub cron_expression: Option<String>,
}

/// Comparison operator of a condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    InList,
    NotInList,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Equals => "equals",
            Operator::NotEquals => "not_equals",
            Operator::GreaterThan => "greater_than",
            Operator::GreaterOrEqual => "greater_or_equal",
            Operator::LessThan => "less_than",
            Operator::LessOrEqual => "less_or_equal",
            Operator::Contains => "contains",
            Operator::NotContains => "not_contains",
            Operator::StartsWith => "starts_with",
            Operator::EndsWith => "ends_with",
            Operator::InList => "in_list",
            Operator::NotInList => "not_in_list",
        }
    }
}

/// One predicate over the trigger data
///
/// `logic` is list-wide: if any condition of a workflow says "OR" the whole
/// list is OR-ed, otherwise it is AND-ed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logic: Option<String>,
}

/// Stored form of an action: a type tag plus free-form configuration
///
/// Decoded into a typed action by the executor right before it runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub config: Map<String, Value>,
}

/// A tenant-scoped automation rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub description: String,
    pub trigger_type: TriggerType,
    pub trigger_config: TriggerConfig,
    /// JSON array of conditions
    pub conditions: Value,
    /// JSON array of actions
    pub actions: Value,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// Cron expression when this workflow must own a live scheduler entry
    pub fn active_schedule(&self) -> Option<&str> {
        if self.is_active && self.trigger_type == TriggerType::Scheduled {
            self.trigger_config.cron_expression.as_deref()
        } else {
            None
        }
    }

    pub fn parse_conditions(&self) -> Result<Vec<Condition>, EngineError> {
        decode_list(&self.conditions)
            .map_err(|e| EngineError::CorruptDefinition(format!("conditions: {}", e)))
    }

    pub fn parse_actions(&self) -> Result<Vec<ActionSpec>, EngineError> {
        decode_list(&self.actions)
            .map_err(|e| EngineError::CorruptDefinition(format!("actions: {}", e)))
    }

    /// Whether an incoming event name matches this workflow's event pattern
    pub fn matches_event(&self, event_name: &str) -> bool {
        if self.trigger_type != TriggerType::Event {
            return false;
        }
        match self.trigger_config.event_name.as_deref() {
            Some("*") => true,
            Some(pattern) => match pattern.strip_suffix('*') {
                Some(prefix) => event_name.starts_with(prefix),
                None => pattern == event_name,
            },
            None => false,
        }
    }
}

/// Null is read as an empty list
fn decode_list<T: serde::de::DeserializeOwned>(value: &Value) -> Result<Vec<T>, serde_json::Error> {
    if value.is_null() {
        return Ok(Vec::new());
    }
    serde_json::from_value(value.clone())
}

/// Lifecycle of one workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(ExecutionStatus::Pending),
            "running" => Some(ExecutionStatus::Running),
            "completed" => Some(ExecutionStatus::Completed),
            "failed" => Some(ExecutionStatus::Failed),
            _ => None,
        }
    }
}

/// Which part of the run a log entry describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStep {
    Conditions,
    Action,
}

/// Timestamped entry of the execution log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub timestamp: DateTime<Utc>,
    pub step: LogStep,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_type: Option<String>,
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One run of a workflow
///
/// References its workflow by id only; history survives workflow edits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: String,
    pub workflow_id: String,
    pub tenant_id: String,
    pub trigger_data: TriggerData,
    pub status: ExecutionStatus,
    pub actions_completed: u32,
    pub actions_failed: u32,
    pub execution_log: Vec<ExecutionLogEntry>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

/// Body of a workflow creation request
#[derive(Debug, Clone, Deserialize)]
pub struct CreateWorkflowRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub trigger_config: TriggerConfig,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// Body of a workflow update request; absent fields stay unchanged
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateWorkflowRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub trigger_type: Option<TriggerType>,
    pub trigger_config: Option<TriggerConfig>,
    pub conditions: Option<Vec<Condition>>,
    pub actions: Option<Vec<ActionSpec>>,
    pub is_active: Option<bool>,
}
