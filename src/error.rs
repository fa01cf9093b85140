//! Typed errors for the engine, executor, queue and scheduler.

use thiserror::Error;

/// Failure while evaluating a single condition against trigger data.
#[derive(Debug, Error)]
pub enum ConditionError {
    #[error("field '{0}' not found in context")]
    MissingField(String),

    #[error("operator '{operator}' expects numeric operands, got {value}")]
    NotNumeric { operator: &'static str, value: String },

    #[error("operator '{operator}' expects string operands")]
    NotString { operator: &'static str },

    #[error("operator '{operator}' expects a list as condition value")]
    NotAList { operator: &'static str },
}

/// Failure of one workflow action.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("unknown action type: {0}")]
    UnknownType(String),

    #[error("invalid config for {action}: {message}")]
    InvalidConfig { action: String, message: String },

    #[error("{action} requires '{field}'")]
    MissingField { action: &'static str, field: &'static str },

    #[error("API call failed with status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("unsupported HTTP method: {0}")]
    UnsupportedMethod(String),

    #[error("execution deadline exceeded")]
    DeadlineExceeded,

    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

/// Failure of a job queue operation.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job not found: {0}")]
    NotFound(String),

    #[error("job {0} not found or not cancellable")]
    NotCancellable(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Failure registering a cron schedule.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid cron expression '{expression}': {message}")]
    InvalidCron { expression: String, message: String },

    #[error("scheduler error: {0}")]
    Scheduler(#[from] tokio_cron_scheduler::JobSchedulerError),
}

/// Failure of a workflow engine operation.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("workflow not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("corrupt workflow definition: {0}")]
    CorruptDefinition(String),

    #[error("condition evaluation failed: {0}")]
    Condition(#[from] ConditionError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("execution aborted: {0}")]
    Aborted(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
