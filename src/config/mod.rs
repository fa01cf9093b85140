/// Configuration management for the waflow engine
///
/// Handles server configuration, database location, worker pool sizing and the
/// endpoints of the messaging and language-model collaborators.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Job worker configuration
    pub worker: WorkerSettings,
    /// Language-model collaborator
    pub llm: LlmConfig,
    /// WhatsApp messaging collaborator
    pub messaging: MessagingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
    /// Wall-clock deadline for manually or event-triggered workflow runs
    pub execution_timeout_secs: u64,
}

/// SQLite storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path of the SQLite database file (default: "data/waflow.db")
    pub path: String,
}

/// Worker pool sizing shared by every configured queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Queues that get a dedicated worker
    pub queues: Vec<String>,
    /// Poller loops per queue
    pub concurrency: usize,
    /// Delay between two poll ticks
    pub poll_interval_ms: u64,
    /// Deadline for a single job handler
    pub job_timeout_secs: u64,
    /// Completed/failed jobs older than this are purged
    pub job_retention_days: i64,
}

/// OpenAI-compatible chat completion endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

/// WhatsApp session gateway used for outbound messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagingConfig {
    pub gateway_url: String,
    pub api_key: String,
}

impl WorkerSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }
}

fn env_or(key: &str, fallback: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| fallback.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(fallback)
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for k8s/container deployment
    fn default() -> Self {
        let queues = env_or("WAFLOW_WORKER_QUEUES", "default")
            .split(',')
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .collect();

        Self {
            server: ServerConfig {
                host: env_or("WAFLOW_HOST", "0.0.0.0"),
                port: env_parse("WAFLOW_PORT", 3004),
                execution_timeout_secs: env_parse("WAFLOW_EXECUTION_TIMEOUT_SECS", 30),
            },
            database: DatabaseConfig {
                path: env_or("WAFLOW_DATABASE_PATH", "data/waflow.db"),
            },
            worker: WorkerSettings {
                queues,
                concurrency: env_parse("WAFLOW_WORKER_CONCURRENCY", 4),
                poll_interval_ms: env_parse("WAFLOW_WORKER_POLL_INTERVAL_MS", 1000),
                job_timeout_secs: env_parse("WAFLOW_WORKER_JOB_TIMEOUT_SECS", 300),
                job_retention_days: env_parse("WAFLOW_JOB_RETENTION_DAYS", 7),
            },
            llm: LlmConfig {
                base_url: env_or("WAFLOW_LLM_BASE_URL", "https://api.openai.com/v1"),
                api_key: env_or("WAFLOW_LLM_API_KEY", ""),
                model: env_or("WAFLOW_LLM_MODEL", "gpt-4o-mini"),
            },
            messaging: MessagingConfig {
                gateway_url: env_or("WAFLOW_WHATSAPP_GATEWAY_URL", "http://localhost:3000/api/send"),
                api_key: env_or("WAFLOW_WHATSAPP_API_KEY", ""),
            },
        }
    }
}
