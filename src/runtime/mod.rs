/// Runtime Execution Engine
///
/// This module provides workflow execution:
/// - Condition evaluation over trigger data
/// - `{variable}` interpolation for action configs
/// - Sequential action execution against collaborators
/// - Cron scheduling of scheduled workflows

// Condition list evaluation (AND/OR list policy)
pub mod condition;

// Variable interpolation
pub mod template;

// Individual action execution handlers
pub mod executor;

// Cron scheduler for scheduled workflows
pub mod scheduler;

// Orchestration of conditions, actions and execution records
pub mod engine;

// Re-export main types
pub use engine::WorkflowEngine;
pub use executor::{Action, ActionExecutor};
pub use scheduler::{schedule_callback, CronScheduler, ScheduleCallback};
