use thiserror::Error;

/// Errors that can occur in the credential vault.
#[derive(Debug, Error)]
pub enum VaultError {
    /// The configured key is missing or not 32 bytes of hex.
    #[error("Invalid vault key: {0}")]
    InvalidKey(String),

    /// The blob failed authentication or could not be decoded. Callers treat
    /// this as fatal for the channel config that owns the blob.
    #[error("Credential blob corrupted: {0}")]
    Corrupted(String),
}

pub type Result<T> = std::result::Result<T, VaultError>;
