/// Job queue type definitions

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

pub const DEFAULT_QUEUE: &str = "default";
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Longest delay between two attempts
pub const MAX_BACKOFF_SECS: i64 = 3600;

/// Lifecycle of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Retrying,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Retrying => "retrying",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "retrying" => Some(JobStatus::Retrying),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }
}

/// Dequeue order is highest priority first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl JobPriority {
    pub fn value(&self) -> i64 {
        match self {
            JobPriority::Low => 0,
            JobPriority::Normal => 5,
            JobPriority::High => 10,
            JobPriority::Critical => 20,
        }
    }
}

/// A queued unit of asynchronous work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub tenant_id: String,
    pub queue: String,
    pub job_type: String,
    pub payload: Value,
    pub status: JobStatus,
    pub priority: i64,
    pub attempts: u32,
    pub max_retries: u32,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub result: Option<Value>,
    pub metadata: Option<Map<String, Value>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Optional knobs for `enqueue`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnqueueOptions {
    /// Defaults to "default"
    #[serde(default)]
    pub queue: Option<String>,
    #[serde(default)]
    pub priority: JobPriority,
    /// Defaults to 3
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Delay the job until this time
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

impl EnqueueOptions {
    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }
}

/// Filters for `list_jobs`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobFilter {
    pub queue: Option<String>,
    pub status: Option<JobStatus>,
    pub job_type: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Read-side aggregation of a tenant's jobs
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobStats {
    pub total: i64,
    pub by_status: HashMap<String, i64>,
    pub by_queue: HashMap<String, i64>,
    pub by_type: HashMap<String, i64>,
    /// Mean of `started_at - created_at` over jobs that have started
    pub average_wait_secs: Option<f64>,
}

/// Delay before the next attempt after `attempts` attempts: 2^n seconds, capped
pub fn backoff(attempts: u32) -> Duration {
    let secs = if attempts >= 12 {
        MAX_BACKOFF_SECS
    } else {
        (1i64 << attempts).min(MAX_BACKOFF_SECS)
    };
    Duration::seconds(secs)
}
