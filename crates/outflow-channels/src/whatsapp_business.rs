use async_trait::async_trait;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use outflow_core::{ChannelKind, RenderedMessage};

use crate::adapter::{classify_http, AdapterError, ChannelAdapter, SendReceipt};
use crate::types::{ChannelConfig, Credentials};

const GRAPH_BASE: &str = "https://graph.facebook.com/v19.0";

/// WhatsApp Business Cloud API adapter. Stateless: one HTTPS POST per send,
/// authorised by the config's access token. Replies arrive by webhook and are
/// handled outside the engine.
pub struct WhatsappBusinessAdapter {
    client: reqwest::Client,
}

impl WhatsappBusinessAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ChannelAdapter for WhatsappBusinessAdapter {
    fn kind(&self) -> ChannelKind {
        ChannelKind::WhatsappBusiness
    }

    async fn send(
        &self,
        _config: &ChannelConfig,
        creds: &Credentials,
        to: &str,
        message: &RenderedMessage,
    ) -> Result<SendReceipt, AdapterError> {
        let Credentials::WhatsappBusiness(creds) = creds else {
            return Err(AdapterError::Rejected(
                "credentials are not WhatsApp-Business-shaped".to_string(),
            ));
        };
        if to.is_empty() || !to.chars().all(|c| c.is_ascii_digit() || c == '+') {
            return Err(AdapterError::RecipientInvalid(format!(
                "not a phone number: {to}"
            )));
        }

        let url = format!("{GRAPH_BASE}/{}/messages", creds.phone_number_id);
        let payload = json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "text",
            "text": { "body": message.body, "preview_url": false },
        });

        debug!(to, "whatsapp business send");
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&creds.access_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AdapterError::Network(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            // Graph error 131026: recipient cannot receive WhatsApp messages.
            if body.contains("131026") {
                return Err(AdapterError::RecipientInvalid(body));
            }
            return Err(classify_http(status.as_u16(), &body));
        }

        let external_id = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| {
                v.get("messages")?
                    .get(0)?
                    .get("id")?
                    .as_str()
                    .map(String::from)
            })
            .unwrap_or_else(|| format!("waba-{}", Uuid::new_v4()));
        Ok(SendReceipt::new(external_id))
    }
}
