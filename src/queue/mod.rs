/// Job Queue Layer
///
/// Persisted priority queue of background jobs with retry bookkeeping, and the
/// worker pool that drains it through registered handlers.

pub mod types;

// SQLite-backed queue with atomic claiming
pub mod store;

pub mod registry;

pub mod worker;

// Handlers shipped with the engine
pub mod handlers;

pub use handlers::{WorkflowJobHandler, WORKFLOW_EXECUTE};
pub use registry::{HandlerRegistry, JobHandler};
pub use store::JobQueue;
pub use types::{backoff, EnqueueOptions, Job, JobFilter, JobPriority, JobStats, JobStatus};
pub use worker::{Worker, WorkerPool};
