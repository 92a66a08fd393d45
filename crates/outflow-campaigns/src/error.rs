use thiserror::Error;

/// Errors from the campaign store and engine control surface.
///
/// Step *processing* failures do not use this type — they classify into job
/// dispositions and attempt metadata instead, so no error ever crosses a
/// worker boundary silently.
#[derive(Debug, Error)]
pub enum CampaignError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("campaign not found: {id}")]
    CampaignNotFound { id: String },

    #[error("recipient not found: {id}")]
    RecipientNotFound { id: String },

    #[error("template not found: {id}")]
    TemplateNotFound { id: String },

    #[error("invalid template: {0}")]
    TemplateInvalid(String),

    #[error("campaign has no steps")]
    NoSteps,

    #[error("campaign has no recipients")]
    NoRecipients,

    #[error("campaign {id} cannot {action} from status {status}")]
    InvalidState {
        id: String,
        action: &'static str,
        status: String,
    },

    #[error("invalid send window: {0}")]
    InvalidSendWindow(String),

    #[error(transparent)]
    Contact(#[from] outflow_contacts::ContactError),

    #[error(transparent)]
    Channel(#[from] outflow_channels::ChannelError),

    #[error(transparent)]
    Queue(#[from] outflow_queue::QueueError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CampaignError>;
