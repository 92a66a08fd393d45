//! `outflow-channels` — channel configuration and the uniform send gateway.
//!
//! The [`dispatcher::Dispatcher`] is a thin layer over all channel kinds:
//! it loads the [`types::ChannelConfig`], decrypts credentials, routes to the
//! adapter for the kind (or, for session-based kinds, to the
//! [`adapter::SessionSender`] seam implemented by the session registry), and
//! classifies whatever happened into the three-valued [`outcome::Outcome`].
//! It records nothing — recipient and attempt state belong to the campaign
//! engine.

pub mod adapter;
pub mod db;
pub mod dispatcher;
pub mod email_api;
pub mod error;
pub mod outcome;
pub mod smtp;
pub mod store;
pub mod twilio;
pub mod types;
pub mod whatsapp_business;

pub use adapter::{AdapterError, ChannelAdapter, SendReceipt, SessionSender};
pub use dispatcher::Dispatcher;
pub use error::{ChannelError, Result};
pub use outcome::{ErrorKind, Outcome};
pub use store::ChannelStore;
pub use types::{ChannelConfig, ChannelSettings, Credentials};
