use thiserror::Error;

/// Errors from session lifecycle and session-based sends.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No usable session; the operator must link/authorise first, or the
    /// session dropped and reconstruction failed.
    #[error("session not connected: {0}")]
    NotConnected(String),

    /// The QR scan window (2 minutes) elapsed without a scan.
    #[error("QR scan window expired")]
    ScanExpired,

    /// The login code was wrong or no longer valid.
    #[error("login code invalid or expired")]
    CodeExpired,

    /// No pending auth flow under the given key.
    #[error("auth flow not found: {key}")]
    AuthFlowNotFound { key: String },

    /// The recipient can never be reached on this channel.
    #[error("invalid recipient: {0}")]
    RecipientInvalid(String),

    /// The session exists but stopped responding mid-operation.
    #[error("session stalled: {0}")]
    Stalled(String),

    /// The platform refused group participant visibility.
    #[error("admin rights required for this group operation")]
    AdminRequired,

    /// Authorisation was rejected (bad password, revoked session).
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// MTProto / CDP protocol failure.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Browser automation failure.
    #[error("browser error: {0}")]
    Browser(String),

    /// An operation exceeded its time budget.
    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Channel config store failure (missing config, corrupted credentials).
    #[error(transparent)]
    Channel(#[from] outflow_channels::ChannelError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;

impl From<SessionError> for outflow_channels::AdapterError {
    fn from(e: SessionError) -> Self {
        use outflow_channels::AdapterError;
        match e {
            SessionError::RecipientInvalid(r) => AdapterError::RecipientInvalid(r),
            SessionError::Stalled(r) => AdapterError::SessionStalled(r),
            SessionError::AuthFailed(r) => AdapterError::AuthFailed(r),
            SessionError::NotConnected(r) => AdapterError::NotConnected(r),
            SessionError::ScanExpired => {
                AdapterError::NotConnected("session awaiting QR scan".to_string())
            }
            SessionError::Timeout { secs } => {
                AdapterError::SessionStalled(format!("timed out after {secs}s"))
            }
            SessionError::Channel(outflow_channels::ChannelError::Vault(e)) => {
                AdapterError::CryptoCorrupted(e.to_string())
            }
            other => AdapterError::Network(other.to_string()),
        }
    }
}
