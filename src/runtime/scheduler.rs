/// Cron scheduler for scheduled workflows
///
/// One shared tokio-cron-scheduler instance dispatches every schedule. The
/// scheduler keeps a workflow-id → job-uuid map so an entry can be replaced or
/// removed when the workflow changes. Each fire awaits the registered callback
/// on the dispatcher, so callbacks must return quickly and push the real work
/// onto their own task.

use crate::error::SchedulerError;
use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

type FireFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Invoked at every fire of a workflow's schedule
pub type ScheduleCallback = Arc<dyn Fn() -> FireFuture + Send + Sync>;

/// Wrap an async closure as a schedule callback
pub fn schedule_callback<F, Fut>(f: F) -> ScheduleCallback
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move || -> FireFuture { Box::pin(f()) })
}

pub struct CronScheduler {
    scheduler: Arc<RwLock<JobScheduler>>,
    entries: Arc<RwLock<HashMap<String, Uuid>>>, // workflow id -> scheduler job
}

impl CronScheduler {
    pub async fn new() -> Result<Self, SchedulerError> {
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler: Arc::new(RwLock::new(scheduler)),
            entries: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Start dispatching registered schedules
    pub async fn start(&self) -> Result<(), SchedulerError> {
        tracing::info!("⏰ Starting cron scheduler");
        let scheduler = self.scheduler.read().await;
        scheduler.start().await?;
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        tracing::info!("⏹️ Stopping cron scheduler");

        self.entries.write().await.clear();

        let mut scheduler = self.scheduler.write().await;
        scheduler.shutdown().await?;

        tracing::info!("✅ Cron scheduler stopped");
        Ok(())
    }

    /// Register (or replace) the schedule of a workflow
    ///
    /// An invalid expression is reported without touching the existing entry.
    pub async fn add_workflow(
        &self,
        workflow_id: &str,
        cron_expression: &str,
        callback: ScheduleCallback,
    ) -> Result<(), SchedulerError> {
        let workflow_id_owned = workflow_id.to_string();

        let job = Job::new_async(cron_expression, move |_uuid, _l| {
            let workflow_id = workflow_id_owned.clone();
            let callback = Arc::clone(&callback);

            Box::pin(async move {
                tracing::debug!("🔔 Cron trigger activated for workflow {}", workflow_id);
                callback().await;
            })
        })
        .map_err(|e| SchedulerError::InvalidCron {
            expression: cron_expression.to_string(),
            message: e.to_string(),
        })?;

        // Hold the map for the whole swap so concurrent updates of the same id serialize
        let mut entries = self.entries.write().await;

        if let Some(old_uuid) = entries.remove(workflow_id) {
            let scheduler = self.scheduler.read().await;
            if let Err(e) = scheduler.remove(&old_uuid).await {
                tracing::warn!("⚠️ Failed to remove old schedule of {}: {}", workflow_id, e);
            }
        }

        let new_uuid = {
            let scheduler = self.scheduler.read().await;
            scheduler.add(job).await?
        };
        entries.insert(workflow_id.to_string(), new_uuid);

        tracing::info!("📅 Scheduled workflow {} ({})", workflow_id, cron_expression);
        Ok(())
    }

    /// Remove the schedule of a workflow. Returns whether one existed.
    pub async fn remove_workflow(&self, workflow_id: &str) -> bool {
        let mut entries = self.entries.write().await;

        match entries.remove(workflow_id) {
            Some(uuid) => {
                let scheduler = self.scheduler.read().await;
                if let Err(e) = scheduler.remove(&uuid).await {
                    tracing::warn!("⚠️ Failed to remove schedule of {}: {}", workflow_id, e);
                }
                tracing::info!("🗑️ Unscheduled workflow {}", workflow_id);
                true
            }
            None => false,
        }
    }

    pub async fn has_workflow(&self, workflow_id: &str) -> bool {
        self.entries.read().await.contains_key(workflow_id)
    }

    /// Number of live schedule entries
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
