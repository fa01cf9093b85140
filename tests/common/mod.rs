//! Shared helpers for integration tests: in-process collaborators and an
//! engine wired to an in-memory database.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::SqlitePool;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use waflow::db;
use waflow::integrations::{LanguageModel, MessageSender, SqliteRecordStore};
use waflow::runtime::{ActionExecutor, CronScheduler, WorkflowEngine};
use waflow::workflow::{CreateWorkflowRequest, WorkflowExecution, WorkflowStorage};

/// Records every message; a recipient of "fail" makes the send fail
#[derive(Default)]
pub struct RecordingMessenger {
    pub sent: Mutex<Vec<(String, String)>>,
}

impl RecordingMessenger {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageSender for RecordingMessenger {
    async fn send_message(&self, recipient: &str, text: &str) -> Result<()> {
        if recipient == "fail" {
            anyhow::bail!("gateway rejected recipient {}", recipient);
        }
        self.sent.lock().unwrap().push((recipient.to_string(), text.to_string()));
        Ok(())
    }
}

/// Answers every prompt with a fixed reply after an optional delay
pub struct ScriptedLlm {
    pub reply: String,
    pub delay: Duration,
    pub prompts: Mutex<Vec<(String, String)>>,
}

impl ScriptedLlm {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            delay: Duration::ZERO,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<(String, String)> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedLlm {
    async fn generate_response(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        self.prompts
            .lock()
            .unwrap()
            .push((system_prompt.to_string(), user_prompt.to_string()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.reply.clone())
    }
}

pub struct TestEnv {
    pub pool: SqlitePool,
    pub engine: Arc<WorkflowEngine>,
    pub messenger: Arc<RecordingMessenger>,
    pub llm: Arc<ScriptedLlm>,
}

pub async fn test_env() -> TestEnv {
    test_env_with_llm(ScriptedLlm::new("Thanks for your order!")).await
}

pub async fn test_env_with_llm(llm: ScriptedLlm) -> TestEnv {
    let pool = db::connect_in_memory().await.unwrap();
    let messenger = Arc::new(RecordingMessenger::default());
    let llm = Arc::new(llm);

    let executor = Arc::new(ActionExecutor::new(
        messenger.clone(),
        llm.clone(),
        Arc::new(SqliteRecordStore::new(pool.clone())),
    ));
    let scheduler = Arc::new(CronScheduler::new().await.unwrap());
    let engine = Arc::new(WorkflowEngine::new(
        WorkflowStorage::new(pool.clone()),
        executor,
        scheduler,
    ));

    TestEnv {
        pool,
        engine,
        messenger,
        llm,
    }
}

/// Build a creation request from JSON
pub fn workflow_request(body: Value) -> CreateWorkflowRequest {
    serde_json::from_value(body).unwrap()
}

/// Poll until a workflow has at least `count` finished executions
pub async fn wait_for_executions(
    engine: &WorkflowEngine,
    tenant_id: &str,
    workflow_id: &str,
    count: usize,
) -> Vec<WorkflowExecution> {
    for _ in 0..100 {
        let executions = engine.list_executions(tenant_id, workflow_id, 50).await.unwrap();
        let finished = executions.iter().filter(|e| e.completed_at.is_some()).count();
        if finished >= count {
            return executions;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("workflow {} never reached {} finished executions", workflow_id, count);
}
