use serde::{Deserialize, Serialize};

use outflow_core::ChannelKind;

use crate::error::{ChannelError, Result};

/// A configured delivery channel for one tenant.
///
/// `credentials` holds the raw stored JSON: either `{"encrypted": <b64>}`
/// (current format) or a legacy plain object. Use
/// [`crate::store::ChannelStore::load_credentials`] to get the typed form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub id: String,
    pub tenant_id: String,
    pub kind: ChannelKind,
    pub name: String,
    pub active: bool,
    pub is_default: bool,
    pub credentials: serde_json::Value,
    pub settings: ChannelSettings,
    pub created_at: String,
    pub updated_at: String,
}

/// Structured per-channel options. All fields optional with defaults so
/// partially-filled settings rows from the admin surface parse cleanly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelSettings {
    /// Max outbound sends per UTC day; `None` = unlimited.
    #[serde(default)]
    pub daily_limit: Option<u32>,
    #[serde(default)]
    pub from_name: Option<String>,
    #[serde(default)]
    pub from_email: Option<String>,
    #[serde(default)]
    pub from_phone: Option<String>,
    #[serde(default)]
    pub reply_polling: ReplyPolling,
    #[serde(default)]
    pub auto_convert: AutoConvert,
    /// Base URL for rendered `{{unsubscribe_link}}` variables.
    #[serde(default)]
    pub unsubscribe_base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyPolling {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_poll_minutes")]
    pub interval_minutes: u32,
}

impl Default for ReplyPolling {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_minutes: default_poll_minutes(),
        }
    }
}

fn default_poll_minutes() -> u32 {
    5
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutoConvert {
    #[serde(default)]
    pub enabled: bool,
}

// --- credentials -----------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpCredentials {
    pub host: String,
    pub port: u16,
    /// TLS from the first byte (ports 465/587-with-STARTTLS handled by the
    /// relay builder); false builds a cleartext transport for dev servers.
    #[serde(default)]
    pub secure: bool,
    pub user: String,
    pub pass: String,
    #[serde(default)]
    pub from_name: Option<String>,
    pub from_email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailApiCredentials {
    /// Provider slug: "sendgrid" or "resend".
    pub provider: String,
    pub api_key: String,
    #[serde(default)]
    pub from_name: Option<String>,
    pub from_email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelephonyCredentials {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsappWebCredentials {
    /// Opaque key naming the on-disk browser profile directory.
    pub session_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsappBusinessCredentials {
    pub access_token: String,
    pub phone_number_id: String,
    #[serde(default)]
    pub webhook_verify_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramCredentials {
    pub api_id: i32,
    pub api_hash: String,
    pub phone_number: String,
    /// Base64 MTProto session blob; present once the operator has authorised.
    #[serde(default)]
    pub session_string: Option<String>,
}

/// Typed credentials, one variant per channel kind.
#[derive(Debug, Clone)]
pub enum Credentials {
    Smtp(SmtpCredentials),
    EmailApi(EmailApiCredentials),
    Telephony(TelephonyCredentials),
    WhatsappWeb(WhatsappWebCredentials),
    WhatsappBusiness(WhatsappBusinessCredentials),
    Telegram(TelegramCredentials),
}

impl Credentials {
    /// Parse the plaintext credential object for `kind`.
    pub fn from_value(kind: ChannelKind, value: &serde_json::Value) -> Result<Self> {
        let invalid = |e: serde_json::Error| ChannelError::InvalidCredentials {
            kind: kind.as_str().to_string(),
            reason: e.to_string(),
        };
        Ok(match kind {
            ChannelKind::EmailSmtp => {
                Credentials::Smtp(serde_json::from_value(value.clone()).map_err(invalid)?)
            }
            ChannelKind::EmailApi => {
                Credentials::EmailApi(serde_json::from_value(value.clone()).map_err(invalid)?)
            }
            ChannelKind::Sms | ChannelKind::Voice => {
                Credentials::Telephony(serde_json::from_value(value.clone()).map_err(invalid)?)
            }
            ChannelKind::WhatsappWeb => {
                Credentials::WhatsappWeb(serde_json::from_value(value.clone()).map_err(invalid)?)
            }
            ChannelKind::WhatsappBusiness => Credentials::WhatsappBusiness(
                serde_json::from_value(value.clone()).map_err(invalid)?,
            ),
            ChannelKind::Telegram => {
                Credentials::Telegram(serde_json::from_value(value.clone()).map_err(invalid)?)
            }
        })
    }

    /// Serialize back to the plaintext object (what gets encrypted at rest).
    pub fn to_value(&self) -> Result<serde_json::Value> {
        Ok(match self {
            Credentials::Smtp(c) => serde_json::to_value(c)?,
            Credentials::EmailApi(c) => serde_json::to_value(c)?,
            Credentials::Telephony(c) => serde_json::to_value(c)?,
            Credentials::WhatsappWeb(c) => serde_json::to_value(c)?,
            Credentials::WhatsappBusiness(c) => serde_json::to_value(c)?,
            Credentials::Telegram(c) => serde_json::to_value(c)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn settings_parse_with_all_fields_missing() {
        let s: ChannelSettings = serde_json::from_value(json!({})).unwrap();
        assert!(s.daily_limit.is_none());
        assert!(!s.reply_polling.enabled);
        assert_eq!(s.reply_polling.interval_minutes, 5);
        assert!(!s.auto_convert.enabled);
    }

    #[test]
    fn settings_parse_partial() {
        let s: ChannelSettings = serde_json::from_value(json!({
            "daily_limit": 200,
            "reply_polling": {"enabled": true},
        }))
        .unwrap();
        assert_eq!(s.daily_limit, Some(200));
        assert!(s.reply_polling.enabled);
        assert_eq!(s.reply_polling.interval_minutes, 5);
    }

    #[test]
    fn credentials_parse_per_kind() {
        let smtp = Credentials::from_value(
            ChannelKind::EmailSmtp,
            &json!({
                "host": "smtp.example.com", "port": 587, "secure": true,
                "user": "u", "pass": "p", "from_email": "out@example.com"
            }),
        )
        .unwrap();
        assert!(matches!(smtp, Credentials::Smtp(_)));

        let tg = Credentials::from_value(
            ChannelKind::Telegram,
            &json!({"api_id": 12345, "api_hash": "h", "phone_number": "+15550001111"}),
        )
        .unwrap();
        match tg {
            Credentials::Telegram(c) => assert!(c.session_string.is_none()),
            _ => panic!("expected telegram credentials"),
        }
    }

    #[test]
    fn malformed_credentials_are_rejected() {
        let err = Credentials::from_value(ChannelKind::Sms, &json!({"account_sid": "only"}));
        assert!(matches!(
            err,
            Err(ChannelError::InvalidCredentials { .. })
        ));
    }
}
