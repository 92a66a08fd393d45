//! `outflow-sessions` — long-lived channel sessions for WhatsApp Web and
//! Telegram, owned by the [`registry::SessionRegistry`].
//!
//! Sessions are process-local mutable objects; nothing outside this crate
//! touches them. The registry caches them by `(tenant_id, channel_config_id)`
//! and serialises all outbound sends through one single-consumer queue per
//! session with a minimum 2 s inter-message gap — WhatsApp Web in particular
//! cannot survive two concurrent sends on the same browser context, because
//! chat navigation races.
//!
//! Persistent session material lives with the channel config: a browser
//! profile directory for WhatsApp Web, an encrypted session string inside the
//! credentials blob for Telegram.

pub mod error;
pub mod registry;
pub mod sendqueue;
pub mod telegram;
pub mod types;
pub mod whatsapp;

pub use error::{Result, SessionError};
pub use registry::SessionRegistry;
pub use types::{
    AuthStep, GroupInfo, GroupMember, InboundMessage, LinkState, SessionKey, SessionProfile,
    SessionReceipt, SessionStatus, SessionStatusReport,
};
