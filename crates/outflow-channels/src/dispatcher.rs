use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, warn};

use outflow_core::{ChannelKind, RenderedMessage, TenantId};

use crate::adapter::{ChannelAdapter, SessionSender};
use crate::email_api::EmailApiAdapter;
use crate::error::ChannelError;
use crate::outcome::{classify, ErrorKind, Outcome};
use crate::smtp::SmtpAdapter;
use crate::store::ChannelStore;
use crate::twilio::{SmsAdapter, VoiceAdapter};
use crate::types::ChannelConfig;
use crate::whatsapp_business::WhatsappBusinessAdapter;

/// The uniform send gateway.
///
/// `dispatch` loads the channel config, decrypts credentials, enforces the
/// config's daily limit, routes to the right adapter (session-based kinds go
/// through the [`SessionSender`] seam, inheriting the registry's per-session
/// serialisation), and folds the result into an [`Outcome`]. It writes no
/// state — attempts and recipient transitions belong to the campaign engine.
pub struct Dispatcher {
    store: Arc<ChannelStore>,
    sessions: Arc<dyn SessionSender>,
    adapters: HashMap<ChannelKind, Arc<dyn ChannelAdapter>>,
    /// Per-config outbound counter for the current UTC day. Process-local:
    /// the daily limit is pacing, not accounting, and a restart resetting it
    /// is acceptable.
    daily: DashMap<String, (String, u32)>,
}

impl Dispatcher {
    pub fn new(store: Arc<ChannelStore>, sessions: Arc<dyn SessionSender>) -> Self {
        let client = reqwest::Client::new();
        let mut adapters: HashMap<ChannelKind, Arc<dyn ChannelAdapter>> = HashMap::new();
        adapters.insert(ChannelKind::EmailSmtp, Arc::new(SmtpAdapter::new()));
        adapters.insert(
            ChannelKind::EmailApi,
            Arc::new(EmailApiAdapter::new(client.clone())),
        );
        adapters.insert(ChannelKind::Sms, Arc::new(SmsAdapter::new(client.clone())));
        adapters.insert(ChannelKind::Voice, Arc::new(VoiceAdapter::new(client.clone())));
        adapters.insert(
            ChannelKind::WhatsappBusiness,
            Arc::new(WhatsappBusinessAdapter::new(client)),
        );
        Self {
            store,
            sessions,
            adapters,
            daily: DashMap::new(),
        }
    }

    /// Replace an adapter. Test seam; also how a deployment can swap a
    /// provider implementation without touching the dispatch path.
    pub fn set_adapter(&mut self, adapter: Arc<dyn ChannelAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    /// Send `message` to `to` through the given channel config.
    pub async fn dispatch(
        &self,
        tenant: &TenantId,
        channel_config_id: &str,
        to: &str,
        message: &RenderedMessage,
    ) -> Outcome {
        let config = match self.store.get(tenant, channel_config_id) {
            Ok(c) => c,
            Err(ChannelError::ConfigNotFound { id }) => {
                return Outcome::permanent(
                    ErrorKind::Unknown,
                    format!("channel config not found: {id}"),
                )
            }
            Err(e) => {
                return Outcome::transient(ErrorKind::TransientNetwork, e.to_string());
            }
        };

        if !config.active {
            return Outcome::permanent(
                ErrorKind::Unknown,
                format!("channel config {channel_config_id} is inactive"),
            );
        }

        if let Some(limit) = config.settings.daily_limit {
            if self.sends_today(&config.id) >= limit {
                warn!(config_id = %config.id, limit, "daily send limit reached");
                return Outcome::transient(
                    ErrorKind::QuotaExceeded,
                    format!("daily limit of {limit} reached"),
                );
            }
        }

        let outcome = if config.kind.is_session_based() {
            match self
                .sessions
                .send_text(tenant, channel_config_id, to, &message.body)
                .await
            {
                Ok(receipt) => {
                    if !receipt.delivered_marker_seen {
                        debug!(config_id = %config.id, to, "send confirmed without delivery marker");
                    }
                    Outcome::Sent {
                        external_id: receipt.external_id,
                    }
                }
                Err(e) => classify(e),
            }
        } else {
            self.dispatch_stateless(&config, to, message).await
        };

        if matches!(outcome, Outcome::Sent { .. }) {
            self.count_send(&config.id);
        }
        outcome
    }

    async fn dispatch_stateless(
        &self,
        config: &ChannelConfig,
        to: &str,
        message: &RenderedMessage,
    ) -> Outcome {
        let Some(adapter) = self.adapters.get(&config.kind) else {
            return Outcome::permanent(
                ErrorKind::Unknown,
                format!("no adapter for channel kind {}", config.kind),
            );
        };

        let creds = match self.store.load_credentials(config) {
            Ok(c) => c,
            Err(ChannelError::Vault(e)) => {
                return Outcome::permanent(
                    ErrorKind::CryptoCorrupted,
                    format!("credentials for {}: {e}", config.id),
                )
            }
            Err(e) => {
                return Outcome::permanent(ErrorKind::Unknown, e.to_string());
            }
        };

        match adapter.send(config, &creds, to, message).await {
            Ok(receipt) => Outcome::Sent {
                external_id: receipt.external_id,
            },
            Err(e) => classify(e),
        }
    }

    fn sends_today(&self, config_id: &str) -> u32 {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        match self.daily.get(config_id) {
            Some(entry) if entry.0 == today => entry.1,
            _ => 0,
        }
    }

    fn count_send(&self, config_id: &str) {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let mut entry = self
            .daily
            .entry(config_id.to_string())
            .or_insert_with(|| (today.clone(), 0));
        if entry.0 != today {
            *entry = (today, 0);
        }
        entry.1 += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterError, SendReceipt};
    use crate::types::{ChannelSettings, Credentials, SmtpCredentials};
    use async_trait::async_trait;
    use outflow_vault::CredentialVault;
    use rusqlite::Connection;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoSessions;

    #[async_trait]
    impl SessionSender for NoSessions {
        async fn send_text(
            &self,
            _tenant: &TenantId,
            _channel_config_id: &str,
            _to: &str,
            _body: &str,
        ) -> Result<SendReceipt, AdapterError> {
            Err(AdapterError::NotConnected("no registry in test".into()))
        }
    }

    /// Scripted stand-in for a stateless adapter.
    struct ScriptedAdapter {
        kind: ChannelKind,
        sends: AtomicUsize,
        script: Vec<Result<String, AdapterError>>,
    }

    #[async_trait]
    impl ChannelAdapter for ScriptedAdapter {
        fn kind(&self) -> ChannelKind {
            self.kind
        }

        async fn send(
            &self,
            _config: &ChannelConfig,
            _creds: &Credentials,
            _to: &str,
            _message: &RenderedMessage,
        ) -> Result<SendReceipt, AdapterError> {
            let n = self.sends.fetch_add(1, Ordering::SeqCst);
            match self.script.get(n.min(self.script.len() - 1)).unwrap() {
                Ok(id) => Ok(SendReceipt::new(id.clone())),
                Err(AdapterError::Network(m)) => Err(AdapterError::Network(m.clone())),
                Err(AdapterError::AuthFailed(m)) => Err(AdapterError::AuthFailed(m.clone())),
                Err(e) => Err(AdapterError::Rejected(e.to_string())),
            }
        }
    }

    fn setup(
        script: Vec<Result<String, AdapterError>>,
        settings: ChannelSettings,
    ) -> (Dispatcher, TenantId, String) {
        let vault = Arc::new(CredentialVault::new(&[1u8; 32]));
        let store = Arc::new(
            ChannelStore::new(Connection::open_in_memory().unwrap(), vault).unwrap(),
        );
        let tenant = TenantId::from("t-1");
        let creds = Credentials::Smtp(SmtpCredentials {
            host: "smtp.example.com".into(),
            port: 587,
            secure: true,
            user: "u".into(),
            pass: "p".into(),
            from_name: None,
            from_email: "out@example.com".into(),
        });
        let config = store
            .create(&tenant, ChannelKind::EmailSmtp, "smtp", &creds, &settings)
            .unwrap();

        let mut dispatcher = Dispatcher::new(store, Arc::new(NoSessions));
        dispatcher.set_adapter(Arc::new(ScriptedAdapter {
            kind: ChannelKind::EmailSmtp,
            sends: AtomicUsize::new(0),
            script,
        }));
        (dispatcher, tenant, config.id)
    }

    #[tokio::test]
    async fn successful_send_yields_external_id() {
        let (d, t, cfg) = setup(vec![Ok("msg-1".into())], Default::default());
        let outcome = d
            .dispatch(&t, &cfg, "ann@example.com", &RenderedMessage::text("hi"))
            .await;
        assert_eq!(
            outcome,
            Outcome::Sent {
                external_id: "msg-1".into()
            }
        );
    }

    #[tokio::test]
    async fn adapter_network_error_classifies_transient() {
        let (d, t, cfg) = setup(
            vec![Err(AdapterError::Network("timeout".into()))],
            Default::default(),
        );
        let outcome = d
            .dispatch(&t, &cfg, "ann@example.com", &RenderedMessage::text("hi"))
            .await;
        assert!(matches!(
            outcome,
            Outcome::TransientFailure {
                kind: ErrorKind::TransientNetwork,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn auth_failure_classifies_permanent() {
        let (d, t, cfg) = setup(
            vec![Err(AdapterError::AuthFailed("bad password".into()))],
            Default::default(),
        );
        let outcome = d
            .dispatch(&t, &cfg, "ann@example.com", &RenderedMessage::text("hi"))
            .await;
        assert!(matches!(
            outcome,
            Outcome::PermanentFailure {
                kind: ErrorKind::AuthFailed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn unknown_config_is_permanent() {
        let (d, t, _) = setup(vec![Ok("x".into())], Default::default());
        let outcome = d
            .dispatch(&t, "no-such-config", "ann@example.com", &RenderedMessage::text("hi"))
            .await;
        assert!(matches!(outcome, Outcome::PermanentFailure { .. }));
    }

    #[tokio::test]
    async fn daily_limit_trips_quota() {
        let (d, t, cfg) = setup(
            vec![Ok("a".into()), Ok("b".into()), Ok("c".into())],
            ChannelSettings {
                daily_limit: Some(2),
                ..Default::default()
            },
        );
        let msg = RenderedMessage::text("hi");
        assert!(matches!(
            d.dispatch(&t, &cfg, "a@example.com", &msg).await,
            Outcome::Sent { .. }
        ));
        assert!(matches!(
            d.dispatch(&t, &cfg, "b@example.com", &msg).await,
            Outcome::Sent { .. }
        ));
        assert!(matches!(
            d.dispatch(&t, &cfg, "c@example.com", &msg).await,
            Outcome::TransientFailure {
                kind: ErrorKind::QuotaExceeded,
                ..
            }
        ));
    }
}
