use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use grammers_client::types::{LoginToken, PasswordToken};
use tracing::{error, info, warn};
use uuid::Uuid;

use outflow_channels::adapter::{AdapterError, SendReceipt};
use outflow_channels::types::{ChannelConfig, TelegramCredentials};
use outflow_channels::{ChannelStore, Credentials, SessionSender};
use outflow_core::{ChannelKind, TenantId};

use crate::error::{Result, SessionError};
use crate::sendqueue::{DirectSender, SendQueue};
use crate::telegram::{TelegramDirect, TelegramSession};
use crate::types::{
    AuthStep, GroupInfo, GroupMember, InboundMessage, LinkState, SessionKey, SessionReceipt,
    SessionStatus, SessionStatusReport, MIN_SEND_GAP,
};
use crate::whatsapp::WhatsAppWebSession;

/// An in-flight Telegram interactive auth.
struct PendingAuth {
    key: SessionKey,
    session: Arc<TelegramSession>,
    login_token: Option<LoginToken>,
    password_token: Option<PasswordToken>,
}

/// Owner of all live channel sessions, keyed by
/// `(tenant_id, channel_config_id)`.
///
/// The registry is the only component that touches session objects. Every
/// outbound send funnels through one [`SendQueue`] per session, which
/// serialises sends FIFO with a minimum 2 s gap — campaign-level pacing
/// composes on top of this, it never replaces it.
pub struct SessionRegistry {
    channels: Arc<ChannelStore>,
    storage_root: PathBuf,
    whatsapp: DashMap<String, Arc<WhatsAppWebSession>>,
    telegram: DashMap<String, Arc<TelegramSession>>,
    queues: DashMap<String, SendQueue>,
    pending_auth: DashMap<String, PendingAuth>,
}

impl SessionRegistry {
    pub fn new(channels: Arc<ChannelStore>, storage_root: PathBuf) -> Self {
        Self {
            channels,
            storage_root,
            whatsapp: DashMap::new(),
            telegram: DashMap::new(),
            queues: DashMap::new(),
            pending_auth: DashMap::new(),
        }
    }

    fn whatsapp_profile_dir(&self, key: &SessionKey) -> PathBuf {
        self.storage_root
            .join("whatsapp_sessions")
            .join(format!("{}_{}", key.tenant_id, key.channel_config_id))
    }

    fn telegram_creds(&self, config: &ChannelConfig) -> Result<TelegramCredentials> {
        match self.channels.load_credentials(config)? {
            Credentials::Telegram(c) => Ok(c),
            _ => Err(SessionError::Protocol(format!(
                "config {} does not hold telegram credentials",
                config.id
            ))),
        }
    }

    fn install_whatsapp(&self, key: &SessionKey, session: Arc<WhatsAppWebSession>) {
        let map_key = key.to_string();
        self.queues.insert(
            map_key.clone(),
            SendQueue::spawn(session.clone() as Arc<dyn DirectSender>, MIN_SEND_GAP),
        );
        self.whatsapp.insert(map_key, session);
    }

    fn install_telegram(&self, key: &SessionKey, session: Arc<TelegramSession>) {
        let map_key = key.to_string();
        self.queues.insert(
            map_key.clone(),
            SendQueue::spawn(
                Arc::new(TelegramDirect(session.clone())) as Arc<dyn DirectSender>,
                MIN_SEND_GAP,
            ),
        );
        self.telegram.insert(map_key, session);
    }

    fn evict(&self, key: &SessionKey) {
        let map_key = key.to_string();
        self.whatsapp.remove(&map_key);
        self.telegram.remove(&map_key);
        self.queues.remove(&map_key);
    }

    /// Idempotent readiness check: a live session is verified; otherwise the
    /// registry tries to reconstruct one from persisted material; otherwise
    /// `NotConnected`. Never blocks the caller on an unrelated session.
    pub async fn ensure_ready(&self, tenant: &TenantId, config_id: &str) -> Result<()> {
        let config = self.channels.get(tenant, config_id)?;
        let key = SessionKey::new(tenant, config_id);
        let map_key = key.to_string();

        match config.kind {
            ChannelKind::WhatsappWeb => {
                let existing = self.whatsapp.get(&map_key).map(|e| e.value().clone());
                if let Some(session) = existing {
                    if session.probe_status().await == SessionStatus::Connected {
                        return Ok(());
                    }
                    warn!(key = %key, "whatsapp session unreachable, relaunching");
                    session.disconnect().await;
                    self.evict(&key);
                }

                let dir = self.whatsapp_profile_dir(&key);
                if !WhatsAppWebSession::has_profile(&dir) {
                    return Err(SessionError::NotConnected(
                        "no persisted whatsapp session; link first".to_string(),
                    ));
                }
                let session = WhatsAppWebSession::launch(key.clone(), dir).await?;
                if session.probe_status().await == SessionStatus::Connected {
                    self.install_whatsapp(&key, session);
                    Ok(())
                } else {
                    session.disconnect().await;
                    Err(SessionError::NotConnected(
                        "persisted whatsapp session is no longer authorised".to_string(),
                    ))
                }
            }
            ChannelKind::Telegram => {
                let existing = self.telegram.get(&map_key).map(|e| e.value().clone());
                if let Some(session) = existing {
                    if session.is_authorized().await {
                        return Ok(());
                    }
                    warn!(key = %key, "telegram session unauthorised, reconnecting");
                    self.evict(&key);
                }

                let creds = self.telegram_creds(&config)?;
                if creds.session_string.is_none() {
                    return Err(SessionError::NotConnected(
                        "no telegram session string; authorise first".to_string(),
                    ));
                }
                let (session, authorized) = TelegramSession::connect(key.clone(), &creds).await?;
                if !authorized {
                    return Err(SessionError::NotConnected(
                        "stored telegram session is no longer authorised".to_string(),
                    ));
                }
                self.install_telegram(&key, Arc::new(session));
                Ok(())
            }
            other => Err(SessionError::Protocol(format!(
                "{other} is not a session-based channel"
            ))),
        }
    }

    /// Admin status shape: `{status, has_credentials, has_session, profile?}`.
    pub async fn status(&self, tenant: &TenantId, config_id: &str) -> Result<SessionStatusReport> {
        let config = self.channels.get(tenant, config_id)?;
        let key = SessionKey::new(tenant, config_id);
        let map_key = key.to_string();
        let has_credentials = self.channels.load_credentials(&config).is_ok();

        // A pending interactive auth takes precedence over cached state.
        for entry in self.pending_auth.iter() {
            if entry.key_matches(&key) {
                let status = if entry.password_token.is_some() {
                    SessionStatus::AwaitingPassword
                } else {
                    SessionStatus::AwaitingCode
                };
                return Ok(SessionStatusReport {
                    status,
                    has_credentials,
                    has_session: false,
                    profile: None,
                });
            }
        }

        match config.kind {
            ChannelKind::WhatsappWeb => {
                let has_session =
                    WhatsAppWebSession::has_profile(&self.whatsapp_profile_dir(&key));
                let session = self.whatsapp.get(&map_key).map(|e| e.value().clone());
                match session {
                    Some(s) => {
                        let status = s.probe_status().await;
                        let profile = if status == SessionStatus::Connected {
                            Some(s.profile().await)
                        } else {
                            None
                        };
                        Ok(SessionStatusReport {
                            status,
                            has_credentials,
                            has_session,
                            profile,
                        })
                    }
                    None => Ok(SessionStatusReport {
                        status: SessionStatus::Disconnected,
                        has_credentials,
                        has_session,
                        profile: None,
                    }),
                }
            }
            ChannelKind::Telegram => {
                let has_session = self
                    .telegram_creds(&config)
                    .map(|c| c.session_string.is_some())
                    .unwrap_or(false);
                let session = self.telegram.get(&map_key).map(|e| e.value().clone());
                match session {
                    Some(s) if s.is_authorized().await => Ok(SessionStatusReport {
                        status: SessionStatus::Connected,
                        has_credentials,
                        has_session,
                        profile: s.profile().await,
                    }),
                    _ => Ok(SessionStatusReport {
                        status: SessionStatus::Disconnected,
                        has_credentials,
                        has_session,
                        profile: None,
                    }),
                }
            }
            other => Err(SessionError::Protocol(format!(
                "{other} is not a session-based channel"
            ))),
        }
    }

    /// WhatsApp Web linking: immediate `Connected` when the restored profile
    /// is authorised, otherwise `AwaitingScan` with the captured QR. The
    /// registry keeps polling internally until the scan succeeds or the
    /// window expires.
    pub async fn begin_link(&self, tenant: &TenantId, config_id: &str) -> Result<LinkState> {
        let config = self.channels.get(tenant, config_id)?;
        if config.kind != ChannelKind::WhatsappWeb {
            return Err(SessionError::Protocol(format!(
                "begin_link is a whatsapp operation, config is {}",
                config.kind
            )));
        }
        let key = SessionKey::new(tenant, config_id);
        let map_key = key.to_string();

        let session = match self.whatsapp.get(&map_key).map(|e| e.value().clone()) {
            Some(s) => s,
            None => {
                let s =
                    WhatsAppWebSession::launch(key.clone(), self.whatsapp_profile_dir(&key))
                        .await?;
                self.install_whatsapp(&key, s.clone());
                s
            }
        };
        session.begin_link().await
    }

    /// Telegram interactive auth, step 1: request a login code.
    pub async fn start_auth(
        &self,
        tenant: &TenantId,
        config_id: &str,
        phone: Option<&str>,
    ) -> Result<AuthStep> {
        let config = self.channels.get(tenant, config_id)?;
        let creds = self.telegram_creds(&config)?;
        let key = SessionKey::new(tenant, config_id);

        let (session, authorized) = TelegramSession::connect(key.clone(), &creds).await?;
        let session = Arc::new(session);
        if authorized {
            let profile = session.profile().await.unwrap_or_default();
            self.finalize_telegram_auth(&key, session).await?;
            return Ok(AuthStep::Authorized { profile });
        }

        let phone = phone.unwrap_or(&creds.phone_number);
        let token = session.request_code(phone).await?;
        let auth_key = Uuid::new_v4().to_string();
        self.pending_auth.insert(
            auth_key.clone(),
            PendingAuth {
                key,
                session,
                login_token: Some(token),
                password_token: None,
            },
        );
        info!(config_id, "telegram login code requested");
        Ok(AuthStep::CodeRequired {
            session_key: auth_key,
        })
    }

    /// Telegram auth, step 2: submit the login code.
    pub async fn verify_code(&self, auth_key: &str, code: &str) -> Result<AuthStep> {
        let (map_key, pending) =
            self.pending_auth
                .remove(auth_key)
                .ok_or_else(|| SessionError::AuthFlowNotFound {
                    key: auth_key.to_string(),
                })?;
        let Some(token) = pending.login_token.as_ref() else {
            return Err(SessionError::AuthFlowNotFound {
                key: auth_key.to_string(),
            });
        };

        match pending.session.submit_code(token, code).await {
            Ok(Ok(profile)) => {
                self.finalize_telegram_auth(&pending.key, pending.session.clone())
                    .await?;
                Ok(AuthStep::Authorized { profile })
            }
            Ok(Err(password_token)) => {
                let mut pending = pending;
                pending.password_token = Some(password_token);
                self.pending_auth.insert(map_key.clone(), pending);
                Ok(AuthStep::PasswordRequired {
                    session_key: map_key,
                })
            }
            Err(e) => {
                // Keep the flow alive so the operator can retry the code.
                self.pending_auth.insert(map_key, pending);
                Err(e)
            }
        }
    }

    /// Telegram auth, step 3: submit the 2FA password.
    pub async fn verify_password(&self, auth_key: &str, password: &str) -> Result<AuthStep> {
        let (_, mut pending) =
            self.pending_auth
                .remove(auth_key)
                .ok_or_else(|| SessionError::AuthFlowNotFound {
                    key: auth_key.to_string(),
                })?;
        let Some(token) = pending.password_token.take() else {
            return Err(SessionError::AuthFlowNotFound {
                key: auth_key.to_string(),
            });
        };

        // The password token is consumed either way; a wrong password
        // restarts the flow from start_auth.
        let profile = pending.session.submit_password(token, password).await?;
        self.finalize_telegram_auth(&pending.key, pending.session.clone())
            .await?;
        Ok(AuthStep::Authorized { profile })
    }

    /// Send through the session's serialised queue.
    pub async fn send_text(
        &self,
        tenant: &TenantId,
        config_id: &str,
        to: &str,
        body: &str,
    ) -> Result<SessionReceipt> {
        self.ensure_ready(tenant, config_id).await?;
        let key = SessionKey::new(tenant, config_id).to_string();
        let queue = self
            .queues
            .get(&key)
            .map(|e| e.value().clone())
            .ok_or_else(|| SessionError::NotConnected("no send queue for session".to_string()))?;
        queue.send(to, body).await
    }

    pub async fn list_groups(&self, tenant: &TenantId, config_id: &str) -> Result<Vec<GroupInfo>> {
        self.ensure_ready(tenant, config_id).await?;
        let key = SessionKey::new(tenant, config_id).to_string();
        if let Some(session) = self.telegram.get(&key).map(|e| e.value().clone()) {
            return session.list_groups().await;
        }
        if let Some(session) = self.whatsapp.get(&key).map(|e| e.value().clone()) {
            return session.list_groups().await;
        }
        Err(SessionError::NotConnected("no live session".to_string()))
    }

    pub async fn list_group_members(
        &self,
        tenant: &TenantId,
        config_id: &str,
        group_id: &str,
    ) -> Result<Vec<GroupMember>> {
        self.ensure_ready(tenant, config_id).await?;
        let key = SessionKey::new(tenant, config_id).to_string();
        if let Some(session) = self.telegram.get(&key).map(|e| e.value().clone()) {
            return session.list_group_members(group_id).await;
        }
        if let Some(session) = self.whatsapp.get(&key).map(|e| e.value().clone()) {
            return session.list_group_members(group_id).await;
        }
        Err(SessionError::NotConnected("no live session".to_string()))
    }

    /// Inbound messages for one peer, strictly above `since`, ascending.
    pub async fn fetch_inbound(
        &self,
        tenant: &TenantId,
        config_id: &str,
        peer: &str,
        since: &str,
    ) -> Result<Vec<InboundMessage>> {
        self.ensure_ready(tenant, config_id).await?;
        let key = SessionKey::new(tenant, config_id).to_string();
        if let Some(session) = self.telegram.get(&key).map(|e| e.value().clone()) {
            return session.fetch_inbound(peer, since).await;
        }
        if let Some(session) = self.whatsapp.get(&key).map(|e| e.value().clone()) {
            return session.fetch_inbound(peer, since).await;
        }
        Err(SessionError::NotConnected("no live session".to_string()))
    }

    /// Close session resources, keeping persisted material.
    pub async fn disconnect(&self, tenant: &TenantId, config_id: &str) -> Result<()> {
        let key = SessionKey::new(tenant, config_id);
        let map_key = key.to_string();
        if let Some((_, session)) = self.whatsapp.remove(&map_key) {
            session.disconnect().await;
        }
        self.telegram.remove(&map_key);
        self.queues.remove(&map_key);
        info!(key = %key, "session disconnected");
        Ok(())
    }

    /// Disconnect and clear persisted material. Telegram also attempts a
    /// remote logout, best-effort.
    pub async fn delete_session(&self, tenant: &TenantId, config_id: &str) -> Result<()> {
        let config = self.channels.get(tenant, config_id)?;
        let key = SessionKey::new(tenant, config_id);
        let map_key = key.to_string();

        if let Some((_, session)) = self.whatsapp.remove(&map_key) {
            session.delete_session().await;
        } else if config.kind == ChannelKind::WhatsappWeb {
            let dir = self.whatsapp_profile_dir(&key);
            if dir.exists() {
                if let Err(e) = std::fs::remove_dir_all(&dir) {
                    warn!(key = %key, error = %e, "failed to remove whatsapp profile dir");
                }
            }
        }

        if let Some((_, session)) = self.telegram.remove(&map_key) {
            session.sign_out().await;
        }
        if config.kind == ChannelKind::Telegram {
            if let Ok(mut creds) = self.telegram_creds(&config) {
                creds.session_string = None;
                self.channels
                    .save_credentials(tenant, config_id, &Credentials::Telegram(creds))?;
            }
        }

        self.queues.remove(&map_key);
        info!(key = %key, "session deleted");
        Ok(())
    }

    /// Boot-time reconnect: try every active session-kind config that has
    /// stored session material, in the background. Failures are logged and
    /// never block boot.
    pub fn reconnect_all(self: &Arc<Self>) {
        let configs = match self.channels.list_session_configs() {
            Ok(c) => c,
            Err(e) => {
                error!(error = %e, "failed to enumerate session configs on boot");
                return;
            }
        };
        info!(count = configs.len(), "starting session auto-reconnect");
        for config in configs {
            let registry = Arc::clone(self);
            tokio::spawn(async move {
                let tenant = TenantId::from(config.tenant_id.clone());
                match registry.ensure_ready(&tenant, &config.id).await {
                    Ok(()) => info!(config_id = %config.id, kind = %config.kind, "session reconnected"),
                    Err(e) => warn!(config_id = %config.id, kind = %config.kind, error = %e, "session reconnect failed"),
                }
            });
        }
    }

    async fn finalize_telegram_auth(
        &self,
        key: &SessionKey,
        session: Arc<TelegramSession>,
    ) -> Result<()> {
        let config = self.channels.get(&key.tenant_id, &key.channel_config_id)?;
        let mut creds = self.telegram_creds(&config)?;
        creds.session_string = Some(session.export_session());
        self.channels.save_credentials(
            &key.tenant_id,
            &key.channel_config_id,
            &Credentials::Telegram(creds),
        )?;
        self.install_telegram(key, session);
        info!(key = %key, "telegram session authorised and persisted");
        Ok(())
    }
}

impl PendingAuth {
    fn key_matches(&self, key: &SessionKey) -> bool {
        self.key == *key
    }
}

#[async_trait]
impl SessionSender for SessionRegistry {
    async fn send_text(
        &self,
        tenant: &TenantId,
        channel_config_id: &str,
        to: &str,
        body: &str,
    ) -> std::result::Result<SendReceipt, AdapterError> {
        let receipt = SessionRegistry::send_text(self, tenant, channel_config_id, to, body)
            .await
            .map_err(AdapterError::from)?;
        Ok(SendReceipt {
            external_id: receipt.external_id,
            delivered_marker_seen: receipt.delivered_marker_seen,
        })
    }
}
