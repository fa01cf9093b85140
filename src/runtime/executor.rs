/// Action execution for workflow runs
///
/// Stored actions are a type tag plus a free-form config map. Before running,
/// each one is decoded into a typed `Action` that enforces the required fields
/// of its kind:
/// - send_whatsapp: outbound message through the messaging collaborator
/// - update_database: equality-filtered update through the record store
/// - call_api: arbitrary outbound HTTP request
/// - call_llm: language-model completion written to `llm_response`
/// - log_message: structured log entry
///
/// Every string in a config supports `{variable}` interpolation.

use crate::error::ActionError;
use crate::integrations::{LanguageModel, MessageSender, RecordStore};
use crate::runtime::template::{interpolate, interpolate_value};
use crate::workflow::types::{ActionSpec, TriggerData};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Context key written by `call_llm`
pub const LLM_RESPONSE_KEY: &str = "llm_response";

#[derive(Debug, Clone, Deserialize)]
pub struct SendWhatsAppConfig {
    /// Falls back to the `from` key of the trigger data
    #[serde(default)]
    pub recipient: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateDatabaseConfig {
    pub table: String,
    pub updates: Map<String, Value>,
    #[serde(rename = "where")]
    pub filter: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallApiConfig {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub body: Option<Value>,
    /// Header values must be strings
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_method() -> String {
    "POST".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallLlmConfig {
    #[serde(default)]
    pub system_prompt: Option<String>,
    pub user_prompt: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogMessageConfig {
    pub message: String,
}

/// Decoded, validated action
#[derive(Debug, Clone)]
pub enum Action {
    SendWhatsApp(SendWhatsAppConfig),
    UpdateDatabase(UpdateDatabaseConfig),
    CallApi(CallApiConfig),
    CallLlm(CallLlmConfig),
    LogMessage(LogMessageConfig),
}

impl Action {
    /// Decode a stored action, checking required fields
    pub fn decode(spec: &ActionSpec) -> Result<Self, ActionError> {
        match spec.action_type.as_str() {
            "send_whatsapp" => Ok(Action::SendWhatsApp(decode_config(spec)?)),
            "update_database" => {
                non_empty_str(spec, "update_database", "table")?;
                require_non_empty_map(spec, "update_database", "updates")?;
                require_non_empty_map(spec, "update_database", "where")?;
                Ok(Action::UpdateDatabase(decode_config(spec)?))
            }
            "call_api" => {
                non_empty_str(spec, "call_api", "url")?;
                Ok(Action::CallApi(decode_config(spec)?))
            }
            "call_llm" => {
                non_empty_str(spec, "call_llm", "user_prompt")?;
                Ok(Action::CallLlm(decode_config(spec)?))
            }
            "log_message" => {
                non_empty_str(spec, "log_message", "message")?;
                Ok(Action::LogMessage(decode_config(spec)?))
            }
            other => Err(ActionError::UnknownType(other.to_string())),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Action::SendWhatsApp(_) => "send_whatsapp",
            Action::UpdateDatabase(_) => "update_database",
            Action::CallApi(_) => "call_api",
            Action::CallLlm(_) => "call_llm",
            Action::LogMessage(_) => "log_message",
        }
    }
}

fn decode_config<T: DeserializeOwned>(spec: &ActionSpec) -> Result<T, ActionError> {
    serde_json::from_value(Value::Object(spec.config.clone())).map_err(|e| ActionError::InvalidConfig {
        action: spec.action_type.clone(),
        message: e.to_string(),
    })
}

fn non_empty_str<'a>(
    spec: &'a ActionSpec,
    action: &'static str,
    field: &'static str,
) -> Result<&'a str, ActionError> {
    spec.config
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or(ActionError::MissingField { action, field })
}

fn require_non_empty_map(spec: &ActionSpec, action: &'static str, field: &'static str) -> Result<(), ActionError> {
    match spec.config.get(field).and_then(Value::as_object) {
        Some(map) if !map.is_empty() => Ok(()),
        _ => Err(ActionError::MissingField { action, field }),
    }
}

/// Executes decoded actions against the collaborators
pub struct ActionExecutor {
    messenger: Arc<dyn MessageSender>,
    llm: Arc<dyn LanguageModel>,
    records: Arc<dyn RecordStore>,
    http: reqwest::Client,
}

impl ActionExecutor {
    pub fn new(
        messenger: Arc<dyn MessageSender>,
        llm: Arc<dyn LanguageModel>,
        records: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            messenger,
            llm,
            records,
            http: reqwest::Client::new(),
        }
    }

    /// Execute one stored action, returning a short summary for the execution log
    ///
    /// `context` is shared with the following actions of the same run.
    pub async fn execute(&self, spec: &ActionSpec, context: &mut TriggerData) -> Result<String, ActionError> {
        let action = Action::decode(spec)?;
        tracing::debug!("⚙️ Executing action: {}", action.kind());

        match action {
            Action::SendWhatsApp(config) => self.send_whatsapp(config, context).await,
            Action::UpdateDatabase(config) => self.update_database(config, context).await,
            Action::CallApi(config) => self.call_api(config, context).await,
            Action::CallLlm(config) => self.call_llm(config, context).await,
            Action::LogMessage(config) => Ok(self.log_message(config, context)),
        }
    }

    async fn send_whatsapp(&self, config: SendWhatsAppConfig, context: &TriggerData) -> Result<String, ActionError> {
        let recipient = config
            .recipient
            .filter(|r| !r.is_empty())
            .map(|r| interpolate(&r, context))
            .or_else(|| context.get("from").and_then(Value::as_str).map(str::to_string))
            .filter(|r| !r.is_empty())
            .ok_or(ActionError::MissingField { action: "send_whatsapp", field: "recipient" })?;

        let message = config
            .message
            .filter(|m| !m.is_empty())
            .map(|m| interpolate(&m, context))
            .ok_or(ActionError::MissingField { action: "send_whatsapp", field: "message" })?;

        self.messenger.send_message(&recipient, &message).await?;

        tracing::info!("📤 WhatsApp message sent to {}", recipient);
        Ok(format!("message sent to {}", recipient))
    }

    async fn update_database(&self, config: UpdateDatabaseConfig, context: &TriggerData) -> Result<String, ActionError> {
        let table = interpolate(&config.table, context);
        let updates = interpolate_map(&config.updates, context);
        let filter = interpolate_map(&config.filter, context);

        let affected = self.records.update_records(&table, &updates, &filter).await?;

        tracing::info!("🗃️ Updated {} row(s) in {}", affected, table);
        Ok(format!("updated {} row(s) in {}", affected, table))
    }

    async fn call_api(&self, config: CallApiConfig, context: &TriggerData) -> Result<String, ActionError> {
        let url = interpolate(&config.url, context);
        let method = config.method.to_uppercase();

        let mut request = match method.as_str() {
            "GET" => self.http.get(&url),
            "POST" => self.http.post(&url),
            "PUT" => self.http.put(&url),
            "PATCH" => self.http.patch(&url),
            "DELETE" => self.http.delete(&url),
            _ => return Err(ActionError::UnsupportedMethod(config.method)),
        };

        for (key, value) in &config.headers {
            request = request.header(key.as_str(), interpolate(value, context));
        }

        if let Some(body) = &config.body {
            request = request.json(&interpolate_value(body, context));
        }

        tracing::debug!("🌍 HTTP Request: {} {}", method, url);
        let response = request
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("HTTP request failed: {}", e))?;

        let status = response.status();
        if status.as_u16() >= 400 {
            let body = response.text().await.unwrap_or_default();
            return Err(ActionError::HttpStatus { status: status.as_u16(), body });
        }

        tracing::info!("✅ HTTP request completed: {} {} (status: {})", method, url, status);
        Ok(format!("{} {} returned {}", method, url, status.as_u16()))
    }

    async fn call_llm(&self, config: CallLlmConfig, context: &mut TriggerData) -> Result<String, ActionError> {
        let system_prompt = config
            .system_prompt
            .map(|p| interpolate(&p, context))
            .unwrap_or_default();
        let user_prompt = interpolate(&config.user_prompt, context);

        let response = self.llm.generate_response(&system_prompt, &user_prompt).await?;

        let summary = format!("llm responded with {} chars", response.chars().count());
        context.insert(LLM_RESPONSE_KEY.to_string(), Value::String(response));
        Ok(summary)
    }

    fn log_message(&self, config: LogMessageConfig, context: &TriggerData) -> String {
        let message = interpolate(&config.message, context);
        tracing::info!(target: "waflow::workflow_log", "{}", message);
        message
    }
}

fn interpolate_map(map: &Map<String, Value>, context: &TriggerData) -> Map<String, Value> {
    map.iter()
        .map(|(k, v)| (k.clone(), interpolate_value(v, context)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(action_type: &str, config: Value) -> ActionSpec {
        ActionSpec {
            action_type: action_type.into(),
            config: config.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = Action::decode(&spec("send_email", json!({}))).unwrap_err();
        assert!(matches!(err, ActionError::UnknownType(ref t) if t == "send_email"));
        assert!(err.to_string().contains("unknown action type"));
    }

    #[test]
    fn call_api_headers_must_be_strings() {
        let ok = spec(
            "call_api",
            json!({ "url": "https://example.test", "headers": { "Authorization": "Bearer {token}" } }),
        );
        match Action::decode(&ok) {
            Ok(Action::CallApi(config)) => assert_eq!(config.headers["Authorization"], "Bearer {token}"),
            other => panic!("unexpected decode result: {:?}", other),
        }

        let numeric = spec(
            "call_api",
            json!({ "url": "https://example.test", "headers": { "X-Retry": 3 } }),
        );
        assert!(matches!(
            Action::decode(&numeric),
            Err(ActionError::InvalidConfig { ref action, .. }) if action == "call_api"
        ));
    }

    #[test]
    fn update_database_requires_all_parts() {
        let ok = spec(
            "update_database",
            json!({ "table": "orders", "updates": { "status": "paid" }, "where": { "id": "{order_id}" } }),
        );
        assert!(matches!(Action::decode(&ok), Ok(Action::UpdateDatabase(_))));

        let no_where = spec("update_database", json!({ "table": "orders", "updates": { "status": "paid" } }));
        assert!(matches!(
            Action::decode(&no_where),
            Err(ActionError::MissingField { field: "where", .. })
        ));

        let empty_updates = spec(
            "update_database",
            json!({ "table": "orders", "updates": {}, "where": { "id": 1 } }),
        );
        assert!(matches!(
            Action::decode(&empty_updates),
            Err(ActionError::MissingField { field: "updates", .. })
        ));
    }

    #[test]
    fn call_api_defaults_to_post() {
        match Action::decode(&spec("call_api", json!({ "url": "http://localhost/hook" }))).unwrap() {
            Action::CallApi(config) => assert_eq!(config.method, "POST"),
            other => panic!("unexpected action {:?}", other),
        }
        assert!(Action::decode(&spec("call_api", json!({}))).is_err());
    }

    #[test]
    fn required_prompt_and_message() {
        assert!(Action::decode(&spec("call_llm", json!({ "system_prompt": "x" }))).is_err());
        assert!(Action::decode(&spec("log_message", json!({ "message": "" }))).is_err());
        assert!(Action::decode(&spec("log_message", json!({ "message": "hi" }))).is_ok());
    }

    #[test]
    fn wrongly_typed_config_is_invalid() {
        let err = Action::decode(&spec("send_whatsapp", json!({ "message": 42 }))).unwrap_err();
        assert!(matches!(err, ActionError::InvalidConfig { .. }));
    }
}
