/// Queue workers
///
/// A `Worker` runs a fixed number of poller loops against one queue. Each tick
/// a loop claims at most one job and runs its handler under the configured
/// timeout. Stopping is cooperative: loops stop claiming as soon as they see the
/// signal, but a job already running is allowed to finish.

use crate::config::WorkerSettings;
use crate::queue::registry::{HandlerRegistry, JobHandler};
use crate::queue::store::JobQueue;
use crate::queue::types::Job;
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tokio::sync::{watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

pub struct Worker {
    queue_name: String,
    concurrency: usize,
    poll_interval: Duration,
    timeout: Duration,
    jobs: JobQueue,
    handlers: Arc<HandlerRegistry>,
    stop_tx: watch::Sender<bool>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl Worker {
    pub fn new(
        queue_name: impl Into<String>,
        concurrency: usize,
        poll_interval: Duration,
        timeout: Duration,
        jobs: JobQueue,
        handlers: Arc<HandlerRegistry>,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            queue_name: queue_name.into(),
            concurrency: concurrency.max(1),
            poll_interval,
            timeout,
            jobs,
            handlers,
            stop_tx,
            loops: Mutex::new(Vec::new()),
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Spawn the poller loops. Calling it on a running worker does nothing.
    pub async fn start(&self) {
        let mut loops = self.loops.lock().await;
        if !loops.is_empty() {
            return;
        }
        self.stop_tx.send_replace(false);

        tracing::info!(
            "👷 Starting worker for queue '{}' ({} pollers, every {:?})",
            self.queue_name,
            self.concurrency,
            self.poll_interval
        );

        for poller in 0..self.concurrency {
            let ctx = PollContext {
                queue_name: self.queue_name.clone(),
                poll_interval: self.poll_interval,
                timeout: self.timeout,
                jobs: self.jobs.clone(),
                handlers: Arc::clone(&self.handlers),
            };
            let stop_rx = self.stop_tx.subscribe();
            loops.push(tokio::spawn(poll_loop(ctx, poller, stop_rx)));
        }
    }

    /// Signal every loop to exit and wait until they have
    pub async fn stop(&self) {
        self.stop_tx.send_replace(true);
        self.wait().await;
        tracing::info!("✅ Worker for queue '{}' stopped", self.queue_name);
    }

    /// Wait for the loops to exit without signalling them
    pub async fn wait(&self) {
        let handles: Vec<JoinHandle<()>> = self.loops.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("❌ Poller of queue '{}' crashed: {}", self.queue_name, e);
            }
        }
    }
}

struct PollContext {
    queue_name: String,
    poll_interval: Duration,
    timeout: Duration,
    jobs: JobQueue,
    handlers: Arc<HandlerRegistry>,
}

async fn poll_loop(ctx: PollContext, poller: usize, mut stop_rx: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(ctx.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = stop_rx.changed() => {
                // sender gone means the worker itself was dropped
                if changed.is_err() {
                    break;
                }
            }
        }

        if *stop_rx.borrow() {
            break;
        }

        process_next(&ctx).await;
    }

    tracing::debug!("Poller {} of queue '{}' exited", poller, ctx.queue_name);
}

/// One dequeue-and-process cycle
async fn process_next(ctx: &PollContext) {
    let job = match ctx.jobs.dequeue(&ctx.queue_name).await {
        Ok(Some(job)) => job,
        Ok(None) => return,
        Err(e) => {
            tracing::error!("❌ Failed to dequeue from '{}': {}", ctx.queue_name, e);
            return;
        }
    };

    tracing::info!("🏃 Processing job {} ({}), attempt {}", job.id, job.job_type, job.attempts);

    let outcome = match ctx.handlers.get(&job.job_type) {
        Some(handler) => run_handler(handler, job.clone(), ctx.timeout).await,
        None => Err(format!("no handler registered for job type '{}'", job.job_type)),
    };

    let recorded = match outcome {
        Ok(result) => {
            tracing::info!("✅ Job {} completed", job.id);
            ctx.jobs.mark_completed(&job.id, result).await
        }
        Err(error) => ctx.jobs.mark_failed(&job.id, &error).await.map(|_| ()),
    };

    if let Err(e) = recorded {
        tracing::error!("❌ Failed to record outcome of job {}: {}", job.id, e);
    }
}

/// Run a handler on its own task so a panic or an overrun only fails this job
async fn run_handler(
    handler: Arc<dyn JobHandler>,
    job: Job,
    timeout: Duration,
) -> Result<Option<Value>, String> {
    let mut task = tokio::spawn(async move { handler.handle(&job).await });

    match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(Ok(result))) => Ok(result),
        Ok(Ok(Err(e))) => Err(format!("{:#}", e)),
        Ok(Err(join_error)) => Err(format!("handler panicked: {}", join_error)),
        Err(_) => {
            task.abort();
            Err(format!("job timed out after {:?}", timeout))
        }
    }
}

/// Workers for every configured queue, started and stopped together
pub struct WorkerPool {
    workers: Vec<Arc<Worker>>,
}

impl WorkerPool {
    pub fn new(workers: Vec<Worker>) -> Self {
        Self {
            workers: workers.into_iter().map(Arc::new).collect(),
        }
    }

    /// One worker per queue named in the settings
    pub fn from_settings(settings: &WorkerSettings, jobs: JobQueue, handlers: Arc<HandlerRegistry>) -> Self {
        let workers = settings
            .queues
            .iter()
            .map(|queue| {
                Worker::new(
                    queue.clone(),
                    settings.concurrency,
                    settings.poll_interval(),
                    settings.job_timeout(),
                    jobs.clone(),
                    Arc::clone(&handlers),
                )
            })
            .collect();
        Self::new(workers)
    }

    pub fn workers(&self) -> &[Arc<Worker>] {
        &self.workers
    }

    pub async fn start(&self) {
        for worker in &self.workers {
            worker.start().await;
        }
    }

    /// Stop every worker concurrently and wait for all of them
    pub async fn stop(&self) {
        let mut set = JoinSet::new();
        for worker in &self.workers {
            let worker = Arc::clone(worker);
            set.spawn(async move { worker.stop().await });
        }
        while set.join_next().await.is_some() {}
        tracing::info!("✅ Worker pool stopped");
    }

    pub async fn wait(&self) {
        for worker in &self.workers {
            worker.wait().await;
        }
    }
}
