/// Waflow: multi-tenant workflow automation engine
///
/// Event-, schedule- and manually-triggered workflows that evaluate conditions
/// over trigger data and run ordered actions, plus a persisted job queue with
/// a worker pool for background work.

// Core configuration and setup
pub mod config;

// SQLite pool and schema
pub mod db;

// Typed errors per subsystem
pub mod error;

// Messaging, language-model and record-store collaborators
pub mod integrations;

// Workflow definitions, execution records and their storage
pub mod workflow;

// Condition evaluation, action execution, scheduling and orchestration
pub mod runtime;

// Persisted job queue and workers
pub mod queue;

// HTTP API layer - tenant-scoped REST endpoints
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use queue::{Job, JobQueue, WorkerPool};
pub use runtime::WorkflowEngine;
pub use server::start_server;
pub use workflow::{Workflow, WorkflowExecution};
