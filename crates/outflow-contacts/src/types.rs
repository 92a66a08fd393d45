use serde::{Deserialize, Serialize};

use outflow_core::ChannelKind;

/// Root of isolation. Everything else carries a `tenant_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    /// Offset applied when evaluating tenant-local send windows.
    pub utc_offset_minutes: i32,
    pub created_at: String,
}

/// A company-level lead. Owned by the lead CRUD subsystem; the engine reads
/// it for template variables and writes it only on prospect auto-conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: String,
    pub tenant_id: String,
    pub company_name: String,
    pub website: Option<String>,
    pub industry: Option<String>,
    /// Where the lead came from ("import", "prospect_conversion", …).
    pub source: Option<String>,
    pub created_at: String,
}

/// A person at a lead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub tenant_id: String,
    pub lead_id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub position: Option<String>,
    pub is_primary: bool,
    pub unsubscribed: bool,
    pub created_at: String,
}

/// A channel-native group that prospects were imported from (a Telegram
/// group, a WhatsApp group).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProspectGroup {
    pub id: String,
    pub tenant_id: String,
    pub channel_config_id: String,
    pub channel_kind: ChannelKind,
    /// Platform-native group reference (packed peer or group JID).
    pub platform_group_id: String,
    pub name: String,
    pub created_at: String,
}

/// Progression of a prospect through outreach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProspectStatus {
    Pending,
    Messaged,
    Replied,
    Converted,
}

impl ProspectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProspectStatus::Pending => "PENDING",
            ProspectStatus::Messaged => "MESSAGED",
            ProspectStatus::Replied => "REPLIED",
            ProspectStatus::Converted => "CONVERTED",
        }
    }
}

impl std::str::FromStr for ProspectStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ProspectStatus::Pending),
            "MESSAGED" => Ok(ProspectStatus::Messaged),
            "REPLIED" => Ok(ProspectStatus::Replied),
            "CONVERTED" => Ok(ProspectStatus::Converted),
            other => Err(format!("unknown prospect status: {other}")),
        }
    }
}

/// A channel-native contact not yet promoted to a lead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prospect {
    pub id: String,
    pub tenant_id: String,
    pub group_id: String,
    pub channel_kind: ChannelKind,
    pub display_name: String,
    pub username: Option<String>,
    /// E.164-ish digits for WhatsApp prospects. May be empty for members the
    /// platform exposes only by internal id; those are not sendable.
    pub phone: Option<String>,
    pub telegram_user_id: Option<i64>,
    /// The address the session layer can actually send to (digit string for
    /// WhatsApp, `@username` or packed peer for Telegram).
    pub peer_address: String,
    pub status: ProspectStatus,
    pub last_messaged_at: Option<String>,
    pub last_replied_at: Option<String>,
    /// Inbound external-id watermark; messages at or below it are consumed.
    pub last_watermark_external_id: Option<String>,
    pub converted_lead_id: Option<String>,
    pub created_at: String,
}

impl Prospect {
    /// A prospect is sendable when its peer address is non-empty.
    pub fn is_sendable(&self) -> bool {
        !self.peer_address.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversationStatus {
    Open,
    Closed,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStatus::Open => "OPEN",
            ConversationStatus::Closed => "CLOSED",
        }
    }
}

/// One thread with one peer on one channel. At most one OPEN conversation
/// exists per (peer, channel).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub tenant_id: String,
    pub channel_kind: ChannelKind,
    pub channel_config_id: String,
    pub contact_id: Option<String>,
    pub prospect_id: Option<String>,
    pub lead_id: Option<String>,
    pub status: ConversationStatus,
    pub created_at: String,
    pub updated_at: String,
}

/// A single message within a conversation, ordered by `created_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: String,
    pub conversation_id: String,
    pub direction: outflow_core::Direction,
    pub content: String,
    pub external_id: Option<String>,
    pub created_at: String,
}

/// Structured filter over leads, resolved once at recipient-addition time and
/// never re-evaluated. Stored verbatim as the campaign's target snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeadFilter {
    pub industry: Option<String>,
    pub source: Option<String>,
    /// Case-insensitive substring match on company name.
    pub company_contains: Option<String>,
}
