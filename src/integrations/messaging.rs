/// WhatsApp session gateway client
///
/// Posts `{ "recipient": ..., "message": ... }` to the configured gateway.

use super::MessageSender;
use crate::config::MessagingConfig;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

#[derive(Debug, Clone)]
pub struct HttpMessageSender {
    client: reqwest::Client,
    gateway_url: String,
    api_key: String,
}

impl HttpMessageSender {
    pub fn new(config: &MessagingConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            gateway_url: config.gateway_url.clone(),
            api_key: config.api_key.clone(),
        }
    }
}

#[async_trait]
impl MessageSender for HttpMessageSender {
    async fn send_message(&self, recipient: &str, text: &str) -> Result<()> {
        tracing::debug!("📤 Sending WhatsApp message to {}", recipient);

        let mut request = self
            .client
            .post(&self.gateway_url)
            .json(&json!({ "recipient": recipient, "message": text }));

        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("WhatsApp gateway request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "WhatsApp gateway returned {}: {}",
                status.as_u16(),
                body
            ));
        }

        Ok(())
    }
}
