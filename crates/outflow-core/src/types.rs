use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a tenant. Every persisted row except jobs carries
/// one, and every store read path filters on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The seven delivery channel kinds.
///
/// `WhatsappWeb` and `Telegram` are *session-based*: they require a
/// long-lived authenticated session owned by the session registry. The rest
/// are stateless request/response providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelKind {
    EmailSmtp,
    EmailApi,
    Sms,
    WhatsappWeb,
    WhatsappBusiness,
    Telegram,
    Voice,
}

impl ChannelKind {
    /// True for kinds that send through a registry-owned session.
    pub fn is_session_based(&self) -> bool {
        matches!(self, ChannelKind::WhatsappWeb | ChannelKind::Telegram)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::EmailSmtp => "EMAIL_SMTP",
            ChannelKind::EmailApi => "EMAIL_API",
            ChannelKind::Sms => "SMS",
            ChannelKind::WhatsappWeb => "WHATSAPP_WEB",
            ChannelKind::WhatsappBusiness => "WHATSAPP_BUSINESS",
            ChannelKind::Telegram => "TELEGRAM",
            ChannelKind::Voice => "VOICE",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ChannelKind {
    type Err = crate::error::CoreError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "EMAIL_SMTP" => Ok(ChannelKind::EmailSmtp),
            "EMAIL_API" => Ok(ChannelKind::EmailApi),
            "SMS" => Ok(ChannelKind::Sms),
            "WHATSAPP_WEB" => Ok(ChannelKind::WhatsappWeb),
            "WHATSAPP_BUSINESS" => Ok(ChannelKind::WhatsappBusiness),
            "TELEGRAM" => Ok(ChannelKind::Telegram),
            "VOICE" => Ok(ChannelKind::Voice),
            other => Err(crate::error::CoreError::UnknownChannelKind(
                other.to_string(),
            )),
        }
    }
}

/// Direction of a contact attempt or conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Outbound,
    Inbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Outbound => "OUTBOUND",
            Direction::Inbound => "INBOUND",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "OUTBOUND" => Ok(Direction::Outbound),
            "INBOUND" => Ok(Direction::Inbound),
            other => Err(format!("unknown direction: {other}")),
        }
    }
}

/// A fully rendered message, ready for an adapter.
///
/// `subject` is only meaningful for email kinds; other adapters ignore it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedMessage {
    pub subject: Option<String>,
    pub body: String,
}

impl RenderedMessage {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            subject: None,
            body: body.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn channel_kind_round_trips_through_str() {
        for kind in [
            ChannelKind::EmailSmtp,
            ChannelKind::EmailApi,
            ChannelKind::Sms,
            ChannelKind::WhatsappWeb,
            ChannelKind::WhatsappBusiness,
            ChannelKind::Telegram,
            ChannelKind::Voice,
        ] {
            assert_eq!(ChannelKind::from_str(kind.as_str()).unwrap(), kind);
        }
    }

    #[test]
    fn session_based_kinds() {
        assert!(ChannelKind::WhatsappWeb.is_session_based());
        assert!(ChannelKind::Telegram.is_session_based());
        assert!(!ChannelKind::EmailSmtp.is_session_based());
        assert!(!ChannelKind::WhatsappBusiness.is_session_based());
    }

    #[test]
    fn unknown_kind_is_an_error() {
        assert!(ChannelKind::from_str("CARRIER_PIGEON").is_err());
    }
}
