/// Collaborator interfaces consumed by the action executor
///
/// The engine only talks to the outside world through these narrow traits:
/// - MessageSender: outbound WhatsApp text messages
/// - LanguageModel: prompt in, text out
/// - RecordStore: equality-filtered field updates on a named table

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

// WhatsApp gateway over HTTP
pub mod messaging;

// OpenAI-compatible chat completions
pub mod llm;

// SQLite-backed record updates for update_database actions
pub mod records;

pub use llm::ChatCompletionClient;
pub use messaging::HttpMessageSender;
pub use records::SqliteRecordStore;

/// Sends a text message to a WhatsApp recipient
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_message(&self, recipient: &str, text: &str) -> Result<()>;
}

/// Generates a text completion from a system and a user prompt
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate_response(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;
}

/// Applies field updates to every row of `table` matching all `filter` pairs
///
/// Returns the number of affected rows.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn update_records(
        &self,
        table: &str,
        updates: &Map<String, Value>,
        filter: &Map<String, Value>,
    ) -> Result<u64>;
}
