use serde::{Deserialize, Serialize};

use outflow_core::{ChannelKind, Direction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignType {
    /// Starts sending the moment the operator starts it.
    Immediate,
    /// First sends anchor to `scheduled_at`.
    Scheduled,
    /// Multi-step drip; steps apply their own delays.
    Sequence,
}

impl CampaignType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignType::Immediate => "IMMEDIATE",
            CampaignType::Scheduled => "SCHEDULED",
            CampaignType::Sequence => "SEQUENCE",
        }
    }
}

impl std::str::FromStr for CampaignType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "IMMEDIATE" => Ok(CampaignType::Immediate),
            "SCHEDULED" => Ok(CampaignType::Scheduled),
            "SEQUENCE" => Ok(CampaignType::Sequence),
            other => Err(format!("unknown campaign type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignStatus {
    Draft,
    Active,
    Paused,
    Completed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "DRAFT",
            CampaignStatus::Active => "ACTIVE",
            CampaignStatus::Paused => "PAUSED",
            CampaignStatus::Completed => "COMPLETED",
        }
    }
}

impl std::str::FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(CampaignStatus::Draft),
            "ACTIVE" => Ok(CampaignStatus::Active),
            "PAUSED" => Ok(CampaignStatus::Paused),
            "COMPLETED" => Ok(CampaignStatus::Completed),
            other => Err(format!("unknown campaign status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub campaign_type: CampaignType,
    pub status: CampaignStatus,
    pub scheduled_at: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    /// Pacing between recipients' *first* sends; later steps are paced only
    /// by their own delays.
    pub message_interval_seconds: i64,
    /// Opaque snapshot of the filter used for mode-(c) enrolment.
    pub target_filter: Option<serde_json::Value>,
    pub created_at: String,
}

/// One ordered action of a campaign. Step 1 carries zero delay by contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignStep {
    pub id: String,
    pub campaign_id: String,
    /// 1..N, unique within the campaign, processed strictly in order.
    pub step_order: u32,
    pub channel_kind: ChannelKind,
    pub channel_config_id: String,
    pub template_id: String,
    pub delay_days: i64,
    pub delay_hours: i64,
    pub delay_minutes: i64,
    /// Tenant-local time-of-day window, "HH:MM-HH:MM".
    pub send_time: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecipientStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Unsubscribed,
    Replied,
}

impl RecipientStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecipientStatus::Pending => "PENDING",
            RecipientStatus::InProgress => "IN_PROGRESS",
            RecipientStatus::Completed => "COMPLETED",
            RecipientStatus::Failed => "FAILED",
            RecipientStatus::Unsubscribed => "UNSUBSCRIBED",
            RecipientStatus::Replied => "REPLIED",
        }
    }

    /// Live recipients still hold (or will hold) a CAMPAIGN_STEP job.
    pub fn is_live(&self) -> bool {
        matches!(self, RecipientStatus::Pending | RecipientStatus::InProgress)
    }
}

impl std::str::FromStr for RecipientStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(RecipientStatus::Pending),
            "IN_PROGRESS" => Ok(RecipientStatus::InProgress),
            "COMPLETED" => Ok(RecipientStatus::Completed),
            "FAILED" => Ok(RecipientStatus::Failed),
            "UNSUBSCRIBED" => Ok(RecipientStatus::Unsubscribed),
            "REPLIED" => Ok(RecipientStatus::Replied),
            other => Err(format!("unknown recipient status: {other}")),
        }
    }
}

/// A (campaign, target) pair with its own step pointer and clock.
///
/// Exactly one of `(lead_id, contact_id)` or `prospect_id` identifies the
/// target; `(campaign_id, contact_id | prospect_id)` is unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    pub id: String,
    pub tenant_id: String,
    pub campaign_id: String,
    pub lead_id: Option<String>,
    pub contact_id: Option<String>,
    pub prospect_id: Option<String>,
    pub status: RecipientStatus,
    /// 1..N+1; N+1 means all steps done. Monotonically non-decreasing.
    pub current_step: u32,
    pub next_action_at: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: String,
}

/// Target description for bulk enrolment.
#[derive(Debug, Clone)]
pub struct RecipientTarget {
    pub lead_id: Option<String>,
    pub contact_id: Option<String>,
    pub prospect_id: Option<String>,
}

impl RecipientTarget {
    pub fn contact(lead_id: &str, contact_id: &str) -> Self {
        Self {
            lead_id: Some(lead_id.to_string()),
            contact_id: Some(contact_id.to_string()),
            prospect_id: None,
        }
    }

    pub fn prospect(prospect_id: &str) -> Self {
        Self {
            lead_id: None,
            contact_id: None,
            prospect_id: Some(prospect_id.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptStatus {
    Queued,
    Sent,
    Delivered,
    Failed,
    Bounced,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Queued => "QUEUED",
            AttemptStatus::Sent => "SENT",
            AttemptStatus::Delivered => "DELIVERED",
            AttemptStatus::Failed => "FAILED",
            AttemptStatus::Bounced => "BOUNCED",
        }
    }
}

impl std::str::FromStr for AttemptStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(AttemptStatus::Queued),
            "SENT" => Ok(AttemptStatus::Sent),
            "DELIVERED" => Ok(AttemptStatus::Delivered),
            "FAILED" => Ok(AttemptStatus::Failed),
            "BOUNCED" => Ok(AttemptStatus::Bounced),
            other => Err(format!("unknown attempt status: {other}")),
        }
    }
}

/// Append-only record of one send try or one received message. Ground truth
/// that a send was attempted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactAttempt {
    pub id: String,
    pub tenant_id: String,
    pub campaign_id: Option<String>,
    pub campaign_step_id: Option<String>,
    pub recipient_id: Option<String>,
    pub lead_id: Option<String>,
    pub contact_id: Option<String>,
    pub channel_kind: ChannelKind,
    pub direction: Direction,
    pub status: AttemptStatus,
    pub subject: Option<String>,
    pub body: String,
    pub external_id: Option<String>,
    pub sent_at: Option<String>,
    pub delivered_at: Option<String>,
    pub opened_at: Option<String>,
    pub clicked_at: Option<String>,
    pub replied_at: Option<String>,
    pub created_at: String,
    /// Provider payload and structured error ({kind, reason}).
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateVariation {
    pub subject: Option<String>,
    pub body: String,
}

/// A message template. AI-backed templates carry pre-generated variations
/// and rendering picks one uniformly at random.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub tenant_id: String,
    pub channel_kind: ChannelKind,
    pub name: String,
    pub subject: Option<String>,
    pub body: String,
    pub use_ai: bool,
    pub variations: Vec<TemplateVariation>,
    pub created_at: String,
}

/// Aggregate recipient counters surfaced to the admin UI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientCounts {
    pub pending: u32,
    pub in_progress: u32,
    pub completed: u32,
    pub failed: u32,
    pub unsubscribed: u32,
    pub replied: u32,
}
