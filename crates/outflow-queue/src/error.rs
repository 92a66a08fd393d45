use thiserror::Error;

/// Errors that can occur within the job queue.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// No job with the given ID exists in the store.
    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    /// The job exists but is not in the state the operation requires.
    #[error("Job {id} is not {expected}")]
    WrongState { id: String, expected: &'static str },

    /// The payload could not be serialised or parsed.
    #[error("Payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, QueueError>;
