//! `outflow-contacts` — the tenant directory: leads, contacts, prospect
//! groups and prospects, plus the unified conversation store.
//!
//! The campaign engine reads these rows; the reply poller is the only
//! engine-side writer (message ingestion, reply watermarks, and prospect →
//! lead auto-conversion). Everything else (CRUD UI, lead ingestion) lives in
//! other subsystems and merely shares the tables.

pub mod db;
pub mod error;
pub mod store;
pub mod types;

pub use error::{ContactError, Result};
pub use store::ContactStore;
pub use types::{
    Contact, Conversation, ConversationMessage, ConversationStatus, Lead, LeadFilter, Prospect,
    ProspectGroup, ProspectStatus, Tenant,
};
