use async_trait::async_trait;
use tracing::debug;

use outflow_core::{ChannelKind, RenderedMessage};

use crate::adapter::{classify_http, AdapterError, ChannelAdapter, SendReceipt};
use crate::types::{ChannelConfig, Credentials, TelephonyCredentials};

const API_BASE: &str = "https://api.twilio.com/2010-04-01";

/// Shared Twilio-style REST plumbing behind the SMS and voice adapters.
struct TelephonyApi;

impl TelephonyApi {
    async fn post_form(
        client: &reqwest::Client,
        creds: &TelephonyCredentials,
        resource: &str,
        form: &[(&str, &str)],
    ) -> Result<serde_json::Value, AdapterError> {
        let url = format!("{API_BASE}/Accounts/{}/{resource}.json", creds.account_sid);
        let resp = client
            .post(&url)
            .basic_auth(&creds.account_sid, Some(&creds.auth_token))
            .form(form)
            .send()
            .await
            .map_err(|e| AdapterError::Network(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            // Error 21211 is the canonical "not a valid phone number".
            if body.contains("21211") || body.contains("not a valid phone number") {
                return Err(AdapterError::RecipientInvalid(body));
            }
            return Err(classify_http(status.as_u16(), &body));
        }
        serde_json::from_str(&body)
            .map_err(|e| AdapterError::Unavailable(format!("unparseable response: {e}")))
    }

    fn sid_of(value: &serde_json::Value) -> Result<String, AdapterError> {
        value
            .get("sid")
            .and_then(|s| s.as_str())
            .map(String::from)
            .ok_or_else(|| AdapterError::Unavailable("response missing sid".to_string()))
    }

    fn from_number<'a>(config: &'a ChannelConfig, creds: &'a TelephonyCredentials) -> &'a str {
        config
            .settings
            .from_phone
            .as_deref()
            .unwrap_or(&creds.from_number)
    }
}

/// SMS via the telephony provider's Messages resource.
pub struct SmsAdapter {
    client: reqwest::Client,
}

impl SmsAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ChannelAdapter for SmsAdapter {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Sms
    }

    async fn send(
        &self,
        config: &ChannelConfig,
        creds: &Credentials,
        to: &str,
        message: &RenderedMessage,
    ) -> Result<SendReceipt, AdapterError> {
        let Credentials::Telephony(creds) = creds else {
            return Err(AdapterError::Rejected(
                "credentials are not telephony-shaped".to_string(),
            ));
        };
        let from = TelephonyApi::from_number(config, creds);
        debug!(to, "sms send");
        let value = TelephonyApi::post_form(
            &self.client,
            creds,
            "Messages",
            &[("To", to), ("From", from), ("Body", &message.body)],
        )
        .await?;
        Ok(SendReceipt::new(TelephonyApi::sid_of(&value)?))
    }
}

/// Voice calls. A non-empty body is spoken via TTS; an empty body just dials.
pub struct VoiceAdapter {
    client: reqwest::Client,
}

impl VoiceAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn twiml(body: &str) -> String {
        if body.is_empty() {
            "<Response><Pause length=\"2\"/></Response>".to_string()
        } else {
            format!("<Response><Say>{}</Say></Response>", xml_escape(body))
        }
    }
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[async_trait]
impl ChannelAdapter for VoiceAdapter {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Voice
    }

    async fn send(
        &self,
        config: &ChannelConfig,
        creds: &Credentials,
        to: &str,
        message: &RenderedMessage,
    ) -> Result<SendReceipt, AdapterError> {
        let Credentials::Telephony(creds) = creds else {
            return Err(AdapterError::Rejected(
                "credentials are not telephony-shaped".to_string(),
            ));
        };
        let from = TelephonyApi::from_number(config, creds);
        let twiml = Self::twiml(&message.body);
        debug!(to, speak = !message.body.is_empty(), "voice call");
        let value = TelephonyApi::post_form(
            &self.client,
            creds,
            "Calls",
            &[("To", to), ("From", from), ("Twiml", &twiml)],
        )
        .await?;
        Ok(SendReceipt::new(TelephonyApi::sid_of(&value)?))
    }
}
