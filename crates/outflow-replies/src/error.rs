use thiserror::Error;

/// Errors from the reply poller's control surface (job seeding). The poll
/// loop itself folds failures into job dispositions and log lines.
#[derive(Debug, Error)]
pub enum ReplyError {
    #[error(transparent)]
    Channel(#[from] outflow_channels::ChannelError),

    #[error(transparent)]
    Queue(#[from] outflow_queue::QueueError),

    #[error(transparent)]
    Contact(#[from] outflow_contacts::ContactError),

    #[error(transparent)]
    Campaign(#[from] outflow_campaigns::CampaignError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ReplyError>;
