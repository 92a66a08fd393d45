//! `outflow-core` — shared configuration, identifiers, and channel taxonomy.
//!
//! Everything here is dependency-light on purpose: every other crate in the
//! workspace pulls this one in, so it carries only the types that genuinely
//! cross subsystem boundaries.

pub mod config;
pub mod error;
pub mod types;

pub use config::OutflowConfig;
pub use error::{CoreError, Result};
pub use types::{ChannelKind, Direction, RenderedMessage, TenantId};
