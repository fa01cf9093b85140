/// Workflow Management Layer
///
/// Type definitions for workflows, conditions, actions and execution records,
/// plus their tenant-scoped SQLite persistence.

// Core workflow type definitions
pub mod types;

// SQLite persistence for workflows and executions
pub mod storage;

// Re-export commonly used types
pub use storage::WorkflowStorage;
pub use types::{
    ActionSpec, Condition, CreateWorkflowRequest, ExecutionLogEntry, ExecutionStatus, LogStep,
    Operator, TriggerConfig, TriggerData, TriggerType, UpdateWorkflowRequest, Workflow,
    WorkflowExecution,
};
