use thiserror::Error;

/// Errors that can occur in the directory store.
#[derive(Debug, Error)]
pub enum ContactError {
    /// A SQLite operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("tenant not found: {id}")]
    TenantNotFound { id: String },

    #[error("lead not found: {id}")]
    LeadNotFound { id: String },

    #[error("contact not found: {id}")]
    ContactNotFound { id: String },

    #[error("prospect not found: {id}")]
    ProspectNotFound { id: String },

    #[error("conversation not found: {id}")]
    ConversationNotFound { id: String },

    #[error("invalid filter: {0}")]
    InvalidFilter(String),
}

pub type Result<T> = std::result::Result<T, ContactError>;
