use thiserror::Error;

/// Errors from the channel configuration store and credential handling.
///
/// Send-path failures use [`crate::adapter::AdapterError`] instead — those
/// classify into an [`crate::outcome::Outcome`] rather than propagating.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("channel config not found: {id}")]
    ConfigNotFound { id: String },

    /// The credentials blob failed decryption. Fatal for this config.
    #[error("credentials corrupted: {0}")]
    Vault(#[from] outflow_vault::VaultError),

    #[error("invalid credentials for {kind}: {reason}")]
    InvalidCredentials { kind: String, reason: String },

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ChannelError>;
