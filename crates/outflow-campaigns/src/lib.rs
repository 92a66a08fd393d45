//! `outflow-campaigns` — the campaign execution engine.
//!
//! Campaigns progress one recipient at a time through ordered steps, driven
//! by `CAMPAIGN_STEP` jobs (one live job per recipient, re-enqueued step by
//! step). The engine is the only component that mutates recipient and
//! campaign state; the queue is the only component that schedules retries;
//! the dispatcher (behind the [`dispatch::OutboundDispatcher`] seam) performs
//! the actual I/O and classifies it.

pub mod db;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod render;
pub mod schedule;
pub mod store;
pub mod types;

pub use dispatch::OutboundDispatcher;
pub use engine::{CampaignEngine, StepJobHandler};
pub use error::{CampaignError, Result};
pub use store::CampaignStore;
pub use types::{
    AttemptStatus, Campaign, CampaignStatus, CampaignStep, CampaignType, ContactAttempt,
    Recipient, RecipientCounts, RecipientStatus, RecipientTarget, Template, TemplateVariation,
};
