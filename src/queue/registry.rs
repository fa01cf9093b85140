/// Job handler registry using ArcSwap
///
/// Pollers look up a handler for every job they claim, so reads are lock-free.
/// Registration clones the map and swaps the pointer; handlers registered after
/// the workers start are picked up on the next claim.

use crate::queue::types::Job;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};

/// Processes jobs of one type
///
/// `Ok(Some(value))` is stored as the job result.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> anyhow::Result<Option<Value>>;
}

pub struct HandlerRegistry {
    handlers: ArcSwap<HashMap<String, Arc<dyn JobHandler>>>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: ArcSwap::new(Arc::new(HashMap::new())),
        }
    }

    /// Register (or replace) the handler of a job type
    pub fn register(&self, job_type: &str, handler: Arc<dyn JobHandler>) {
        self.handlers.rcu(|current| {
            let mut next = (**current).clone();
            next.insert(job_type.to_string(), Arc::clone(&handler));
            next
        });
        tracing::info!("🧩 Registered job handler: {}", job_type);
    }

    pub fn unregister(&self, job_type: &str) -> bool {
        let mut removed = false;
        self.handlers.rcu(|current| {
            let mut next = (**current).clone();
            removed = next.remove(job_type).is_some();
            next
        });
        removed
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.load().get(job_type).cloned()
    }

    pub fn job_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.load().keys().cloned().collect();
        types.sort();
        types
    }
}
