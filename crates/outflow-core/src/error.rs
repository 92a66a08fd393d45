use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown channel kind: {0}")]
    UnknownChannelKind(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
