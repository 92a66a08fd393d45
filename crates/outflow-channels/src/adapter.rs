use async_trait::async_trait;
use thiserror::Error;

use outflow_core::{ChannelKind, RenderedMessage, TenantId};

use crate::types::{ChannelConfig, Credentials};

/// What a successful send hands back.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    /// Provider/platform message identifier.
    pub external_id: String,
    /// For session-based sends: whether the on-screen delivery marker was
    /// observed. Stateless providers always report `true`.
    pub delivered_marker_seen: bool,
}

impl SendReceipt {
    pub fn new(external_id: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            delivered_marker_seen: true,
        }
    }
}

/// Failure surface shared by every adapter. The dispatcher folds these into
/// the three-valued outcome; adapters never decide retry policy themselves.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Connection problems, timeouts — worth retrying.
    #[error("network error: {0}")]
    Network(String),

    /// Provider-side 5xx / "try again later".
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// Provider rate/volume limit hit.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Credentials rejected. The operator must fix the channel config.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The recipient address can never receive on this channel.
    #[error("invalid recipient: {0}")]
    RecipientInvalid(String),

    /// Provider-side validation rejection (malformed payload etc.).
    #[error("rejected by provider: {0}")]
    Rejected(String),

    /// No usable session for a session-based channel.
    #[error("session not connected: {0}")]
    NotConnected(String),

    /// The session exists but stopped responding mid-send.
    #[error("session stalled: {0}")]
    SessionStalled(String),

    /// The stored credentials blob failed decryption. Fatal for the config.
    #[error("credentials corrupted: {0}")]
    CryptoCorrupted(String),
}

/// Fold an HTTP provider response into the shared failure surface. Used by
/// every REST adapter so the transient/permanent split stays uniform.
pub(crate) fn classify_http(status: u16, body: &str) -> AdapterError {
    let detail = format!("HTTP {status}: {}", body.chars().take(300).collect::<String>());
    match status {
        401 | 403 => AdapterError::AuthFailed(detail),
        429 => AdapterError::QuotaExceeded(detail),
        400..=499 => AdapterError::Rejected(detail),
        _ => AdapterError::Unavailable(detail),
    }
}

/// A stateless channel adapter (SMTP, provider HTTP APIs, SMS, voice).
///
/// Implementations hold their own private resources (SMTP connection pools,
/// HTTP clients) keyed by config where needed, and must be shareable across
/// worker tasks.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn kind(&self) -> ChannelKind;

    async fn send(
        &self,
        config: &ChannelConfig,
        creds: &Credentials,
        to: &str,
        message: &RenderedMessage,
    ) -> Result<SendReceipt, AdapterError>;
}

/// Seam to the session registry for WHATSAPP_WEB / TELEGRAM sends.
///
/// The registry serialises sends per session and enforces the inter-message
/// gap behind this interface; the dispatcher only awaits its turn.
#[async_trait]
pub trait SessionSender: Send + Sync {
    async fn send_text(
        &self,
        tenant: &TenantId,
        channel_config_id: &str,
        to: &str,
        body: &str,
    ) -> Result<SendReceipt, AdapterError>;
}
