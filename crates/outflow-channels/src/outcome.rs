use serde::{Deserialize, Serialize};

use crate::adapter::AdapterError;

/// Structured failure kind carried on attempts (`metadata.error.kind`) and
/// used by the engine to pick a job disposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NotConnected,
    ScanExpired,
    RecipientInvalid,
    TransientNetwork,
    QuotaExceeded,
    AuthFailed,
    RenderError,
    CryptoCorrupted,
    CampaignNotActive,
    AdminRequired,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotConnected => "NOT_CONNECTED",
            ErrorKind::ScanExpired => "SCAN_EXPIRED",
            ErrorKind::RecipientInvalid => "RECIPIENT_INVALID",
            ErrorKind::TransientNetwork => "TRANSIENT_NETWORK",
            ErrorKind::QuotaExceeded => "QUOTA_EXCEEDED",
            ErrorKind::AuthFailed => "AUTH_FAILED",
            ErrorKind::RenderError => "RENDER_ERROR",
            ErrorKind::CryptoCorrupted => "CRYPTO_CORRUPTED",
            ErrorKind::CampaignNotActive => "CAMPAIGN_NOT_ACTIVE",
            ErrorKind::AdminRequired => "ADMIN_REQUIRED",
            ErrorKind::Unknown => "UNKNOWN",
        }
    }
}

/// The dispatcher's whole contract: a send either happened, may work later,
/// or will never work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Sent {
        external_id: String,
    },
    TransientFailure {
        kind: ErrorKind,
        reason: String,
    },
    PermanentFailure {
        kind: ErrorKind,
        reason: String,
    },
}

impl Outcome {
    pub fn transient(kind: ErrorKind, reason: impl Into<String>) -> Self {
        Outcome::TransientFailure {
            kind,
            reason: reason.into(),
        }
    }

    pub fn permanent(kind: ErrorKind, reason: impl Into<String>) -> Self {
        Outcome::PermanentFailure {
            kind,
            reason: reason.into(),
        }
    }
}

/// Uniform classification of adapter failures, identical for every adapter,
/// session-based or stateless:
///
/// * timeouts, 5xx, "try again" → transient
/// * 4xx validation, invalid recipient, auth failure → permanent
/// * quota exhausted → transient with a longer pause
/// * `NotConnected` / stalled session → transient
pub fn classify(err: AdapterError) -> Outcome {
    match err {
        AdapterError::Network(reason) | AdapterError::Unavailable(reason) => {
            Outcome::transient(ErrorKind::TransientNetwork, reason)
        }
        AdapterError::QuotaExceeded(reason) => {
            Outcome::transient(ErrorKind::QuotaExceeded, reason)
        }
        AdapterError::NotConnected(reason) => {
            Outcome::transient(ErrorKind::NotConnected, reason)
        }
        AdapterError::SessionStalled(reason) => {
            Outcome::transient(ErrorKind::NotConnected, format!("session stalled: {reason}"))
        }
        AdapterError::RecipientInvalid(reason) => {
            Outcome::permanent(ErrorKind::RecipientInvalid, reason)
        }
        AdapterError::AuthFailed(reason) => Outcome::permanent(ErrorKind::AuthFailed, reason),
        AdapterError::CryptoCorrupted(reason) => {
            Outcome::permanent(ErrorKind::CryptoCorrupted, reason)
        }
        AdapterError::Rejected(reason) => Outcome::permanent(ErrorKind::Unknown, reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_failures_are_transient() {
        assert!(matches!(
            classify(AdapterError::Network("timed out".into())),
            Outcome::TransientFailure {
                kind: ErrorKind::TransientNetwork,
                ..
            }
        ));
        assert!(matches!(
            classify(AdapterError::Unavailable("502".into())),
            Outcome::TransientFailure { .. }
        ));
    }

    #[test]
    fn auth_and_recipient_failures_are_permanent() {
        assert!(matches!(
            classify(AdapterError::AuthFailed("bad token".into())),
            Outcome::PermanentFailure {
                kind: ErrorKind::AuthFailed,
                ..
            }
        ));
        assert!(matches!(
            classify(AdapterError::RecipientInvalid("no such number".into())),
            Outcome::PermanentFailure {
                kind: ErrorKind::RecipientInvalid,
                ..
            }
        ));
    }

    #[test]
    fn session_failures_are_transient() {
        assert!(matches!(
            classify(AdapterError::NotConnected("no session".into())),
            Outcome::TransientFailure {
                kind: ErrorKind::NotConnected,
                ..
            }
        ));
        assert!(matches!(
            classify(AdapterError::SessionStalled("send control missing".into())),
            Outcome::TransientFailure { .. }
        ));
    }

    #[test]
    fn quota_is_transient_with_its_own_kind() {
        assert!(matches!(
            classify(AdapterError::QuotaExceeded("429".into())),
            Outcome::TransientFailure {
                kind: ErrorKind::QuotaExceeded,
                ..
            }
        ));
    }
}
