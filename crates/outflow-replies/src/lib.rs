//! `outflow-replies` — inbound reply ingestion for session-based channels.
//!
//! One `POLL_REPLIES` job per eligible channel config cycles forever: it
//! pulls inbound messages per watermarked peer, appends them to the peer's
//! open conversation, attributes each reply to the most recent unanswered
//! outbound attempt, flips prospects and recipients to REPLIED (which
//! short-circuits remaining campaign steps), optionally auto-converts the
//! prospect into a lead, and advances the watermark.
//!
//! Email and WhatsApp Business replies arrive by webhook and are handled
//! outside the engine; the poller covers WHATSAPP_WEB and TELEGRAM only.

pub mod error;
pub mod poller;
pub mod source;

pub use error::{ReplyError, Result};
pub use poller::{PollPayload, ReplyPoller};
pub use source::InboundSource;
