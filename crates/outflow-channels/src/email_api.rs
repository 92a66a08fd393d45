use async_trait::async_trait;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use outflow_core::{ChannelKind, RenderedMessage};

use crate::adapter::{classify_http, AdapterError, ChannelAdapter, SendReceipt};
use crate::types::{ChannelConfig, Credentials, EmailApiCredentials};

const SENDGRID_URL: &str = "https://api.sendgrid.com/v3/mail/send";
const RESEND_URL: &str = "https://api.resend.com/emails";

/// Transactional email over a provider HTTP API. One HTTPS POST per send;
/// the provider-specific payload shape stays inside this adapter.
pub struct EmailApiAdapter {
    client: reqwest::Client,
}

impl EmailApiAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn from_field(config: &ChannelConfig, creds: &EmailApiCredentials) -> (String, Option<String>) {
        let email = config
            .settings
            .from_email
            .clone()
            .unwrap_or_else(|| creds.from_email.clone());
        let name = config
            .settings
            .from_name
            .clone()
            .or_else(|| creds.from_name.clone());
        (email, name)
    }

    async fn send_sendgrid(
        &self,
        creds: &EmailApiCredentials,
        from: (String, Option<String>),
        to: &str,
        message: &RenderedMessage,
    ) -> Result<SendReceipt, AdapterError> {
        let mut from_obj = json!({ "email": from.0 });
        if let Some(name) = from.1 {
            from_obj["name"] = json!(name);
        }
        let payload = json!({
            "personalizations": [{ "to": [{ "email": to }] }],
            "from": from_obj,
            "subject": message.subject.as_deref().unwrap_or_default(),
            "content": [{ "type": "text/html", "value": message.body }],
        });

        let resp = self
            .client
            .post(SENDGRID_URL)
            .bearer_auth(&creds.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AdapterError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_http(status.as_u16(), &body));
        }

        // Sendgrid returns 202 with the id in a header, not the body.
        let external_id = resp
            .headers()
            .get("x-message-id")
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .unwrap_or_else(|| format!("sendgrid-{}", Uuid::new_v4()));
        Ok(SendReceipt::new(external_id))
    }

    async fn send_resend(
        &self,
        creds: &EmailApiCredentials,
        from: (String, Option<String>),
        to: &str,
        message: &RenderedMessage,
    ) -> Result<SendReceipt, AdapterError> {
        let from_field = match from.1 {
            Some(name) => format!("{name} <{}>", from.0),
            None => from.0,
        };
        let payload = json!({
            "from": from_field,
            "to": [to],
            "subject": message.subject.as_deref().unwrap_or_default(),
            "html": message.body,
        });

        let resp = self
            .client
            .post(RESEND_URL)
            .bearer_auth(&creds.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AdapterError::Network(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(classify_http(status.as_u16(), &body));
        }

        let external_id = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("id").and_then(|id| id.as_str()).map(String::from))
            .unwrap_or_else(|| format!("resend-{}", Uuid::new_v4()));
        Ok(SendReceipt::new(external_id))
    }
}

#[async_trait]
impl ChannelAdapter for EmailApiAdapter {
    fn kind(&self) -> ChannelKind {
        ChannelKind::EmailApi
    }

    async fn send(
        &self,
        config: &ChannelConfig,
        creds: &Credentials,
        to: &str,
        message: &RenderedMessage,
    ) -> Result<SendReceipt, AdapterError> {
        let Credentials::EmailApi(creds) = creds else {
            return Err(AdapterError::Rejected(
                "credentials are not email-API-shaped".to_string(),
            ));
        };
        if !to.contains('@') {
            return Err(AdapterError::RecipientInvalid(format!(
                "not an email address: {to}"
            )));
        }

        let from = Self::from_field(config, creds);
        debug!(provider = %creds.provider, to, "email api send");
        match creds.provider.as_str() {
            "sendgrid" => self.send_sendgrid(creds, from, to, message).await,
            "resend" => self.send_resend(creds, from, to, message).await,
            other => Err(AdapterError::Rejected(format!(
                "unknown email provider: {other}"
            ))),
        }
    }
}
