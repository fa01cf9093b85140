/// Server setup and initialization
///
/// Wires together storage, collaborators, the workflow engine, the cron
/// scheduler, the job workers and the HTTP routes, and tears them down again on
/// Ctrl-C.

use crate::{
    api::{create_api_routes, AppState},
    config::Config,
    db,
    integrations::{ChatCompletionClient, HttpMessageSender, SqliteRecordStore},
    queue::{HandlerRegistry, JobQueue, WorkerPool, WorkflowJobHandler, WORKFLOW_EXECUTE},
    runtime::{ActionExecutor, CronScheduler, WorkflowEngine},
    workflow::WorkflowStorage,
};
use anyhow::Result;
use axum::{routing::get, Router};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpListener, task::JoinHandle};
use tracing_subscriber::EnvFilter;

const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Long-lived components shared by the HTTP layer and the background tasks
pub struct Services {
    pub engine: Arc<WorkflowEngine>,
    pub jobs: JobQueue,
    pub handlers: Arc<HandlerRegistry>,
    pub workers: WorkerPool,
}

/// Build every component on top of an open pool
///
/// Nothing is started yet: schedules are not loaded and workers are idle.
pub async fn build_services(config: &Config, pool: SqlitePool) -> Result<Services> {
    tracing::info!("⚙️ Initializing action executor");
    let executor = Arc::new(ActionExecutor::new(
        Arc::new(HttpMessageSender::new(&config.messaging)),
        Arc::new(ChatCompletionClient::new(&config.llm)),
        Arc::new(SqliteRecordStore::new(pool.clone())),
    ));

    tracing::info!("⏰ Initializing cron scheduler");
    let scheduler = Arc::new(
        CronScheduler::new()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to initialize cron scheduler: {}", e))?,
    );

    tracing::info!("🚀 Initializing workflow engine");
    let engine = Arc::new(WorkflowEngine::new(WorkflowStorage::new(pool.clone()), executor, scheduler));

    let jobs = JobQueue::new(pool);
    let handlers = Arc::new(HandlerRegistry::new());
    handlers.register(WORKFLOW_EXECUTE, Arc::new(WorkflowJobHandler::new(Arc::clone(&engine))));

    let workers = WorkerPool::from_settings(&config.worker, jobs.clone(), Arc::clone(&handlers));

    Ok(Services {
        engine,
        jobs,
        handlers,
        workers,
    })
}

/// Create the main Axum application with all routes
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .merge(create_api_routes().with_state(state))
}

/// Start the HTTP server and every background component
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting waflow server...");

    let pool = db::connect(&config.database.path).await?;
    let services = build_services(&config, pool).await?;

    tracing::info!("📥 Loading scheduled workflows from storage");
    services
        .engine
        .load_schedules()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load scheduled workflows: {}", e))?;
    services.engine.scheduler().start().await?;

    services.workers.start().await;
    let sweeper = spawn_retention_sweeper(services.jobs.clone(), config.worker.job_retention_days);

    let app = create_app(AppState {
        engine: Arc::clone(&services.engine),
        jobs: services.jobs.clone(),
        execution_timeout: Duration::from_secs(config.server.execution_timeout_secs),
    });

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("🛑 Shutting down");
    sweeper.abort();
    services.workers.stop().await;
    if let Err(e) = services.engine.scheduler().shutdown().await {
        tracing::warn!("⚠️ Scheduler shutdown failed: {}", e);
    }

    Ok(())
}

/// Purge finished jobs older than the retention window once an hour
fn spawn_retention_sweeper(jobs: JobQueue, retention_days: i64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RETENTION_SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            let Some(cutoff) = retention_cutoff(Utc::now(), retention_days) else {
                tracing::error!("❌ Job retention of {} days is out of range, sweeper disabled", retention_days);
                return;
            };
            match jobs.delete_old_jobs(cutoff).await {
                Ok(0) => {}
                Ok(deleted) => tracing::info!("🧹 Purged {} finished job(s) older than {}", deleted, cutoff),
                Err(e) => tracing::warn!("⚠️ Job retention sweep failed: {}", e),
            }
        }
    })
}

/// Oldest finish time that survives a sweep, if the window is representable
fn retention_cutoff(now: DateTime<Utc>, retention_days: i64) -> Option<DateTime<Utc>> {
    chrono::Duration::try_days(retention_days).and_then(|window| now.checked_sub_signed(window))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("❌ Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn health_check() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retention_cutoff_rejects_unrepresentable_windows() {
        let now = Utc::now();
        assert_eq!(retention_cutoff(now, 7), Some(now - chrono::Duration::days(7)));
        assert!(retention_cutoff(now, i64::MAX).is_none());
        assert!(retention_cutoff(now, i64::MIN).is_none());
    }
}
