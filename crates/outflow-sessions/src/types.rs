use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use outflow_core::TenantId;

/// Scan window for a fresh WhatsApp Web QR.
pub const QR_SCAN_WINDOW: Duration = Duration::from_secs(120);
/// How long to wait for the WhatsApp send control to appear.
pub const SEND_CONTROL_TIMEOUT: Duration = Duration::from_secs(15);
/// Page navigation budget.
pub const NAV_TIMEOUT: Duration = Duration::from_secs(30);
/// MTProto connect budget (covers datacenter migration retries).
pub const MTPROTO_CONNECT_TIMEOUT: Duration = Duration::from_secs(600);
/// Minimum gap between two sends on the same session.
pub const MIN_SEND_GAP: Duration = Duration::from_secs(2);

/// Cache key for a session: one session per channel config per tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub tenant_id: TenantId,
    pub channel_config_id: String,
}

impl SessionKey {
    pub fn new(tenant_id: &TenantId, channel_config_id: &str) -> Self {
        Self {
            tenant_id: tenant_id.clone(),
            channel_config_id: channel_config_id.to_string(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tenant_id, self.channel_config_id)
    }
}

/// Runtime state of a session, as exposed to the admin surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Checking,
    Disconnected,
    AwaitingScan,
    AwaitingCode,
    AwaitingPassword,
    Connected,
}

/// The authenticated account behind a session, where the platform exposes it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionProfile {
    pub display_name: Option<String>,
    pub username: Option<String>,
    pub phone: Option<String>,
}

/// Admin-facing status shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatusReport {
    pub status: SessionStatus,
    pub has_credentials: bool,
    /// Whether persisted session material exists (profile dir / session
    /// string), regardless of whether it is currently live.
    pub has_session: bool,
    pub profile: Option<SessionProfile>,
}

/// Result of `begin_link` for WhatsApp Web.
#[derive(Debug, Clone)]
pub enum LinkState {
    /// Session restored or scan completed.
    Connected { profile: SessionProfile },
    /// Scan pending; the PNG is base64 for direct embedding.
    AwaitingScan { qr_image: String },
}

/// Progress of the Telegram interactive auth flow.
#[derive(Debug, Clone)]
pub enum AuthStep {
    /// A login code was sent; continue with `verify_code(session_key, code)`.
    CodeRequired { session_key: String },
    /// 2FA enabled; continue with `verify_password(session_key, password)`.
    PasswordRequired { session_key: String },
    /// Fully authorised; the session blob has been persisted.
    Authorized { profile: SessionProfile },
}

/// A group visible to a session, for prospect import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupInfo {
    /// Platform reference usable with `list_group_members` (packed peer for
    /// Telegram, group JID for WhatsApp).
    pub id: String,
    pub title: String,
    pub member_count: Option<usize>,
}

/// A member of a group. `peer_address` is empty when the platform exposed the
/// member only by an internal id — such members are not sendable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMember {
    pub display_name: String,
    pub username: Option<String>,
    pub phone: Option<String>,
    pub telegram_user_id: Option<i64>,
    pub peer_address: String,
}

/// One inbound message pulled by `fetch_inbound`, strictly above the caller's
/// watermark, in ascending external-id order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Monotonic per-peer external id (zero-padded so string order matches
    /// numeric order).
    pub external_id: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

/// Receipt from a session send, before the dispatcher folds it into the
/// uniform shape.
#[derive(Debug, Clone)]
pub struct SessionReceipt {
    pub external_id: String,
    pub delivered_marker_seen: bool,
}
