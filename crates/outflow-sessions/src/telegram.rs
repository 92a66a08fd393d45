use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use grammers_client::types::{Chat, LoginToken, PasswordToken, User};
use grammers_client::{Client, Config, InitParams, SignInError};
use grammers_session::{PackedChat, Session};
use tracing::{debug, info, warn};

use outflow_channels::types::TelegramCredentials;

use crate::error::{Result, SessionError};
use crate::sendqueue::DirectSender;
use crate::types::{
    GroupInfo, GroupMember, InboundMessage, SessionKey, SessionProfile, SessionReceipt,
    MTPROTO_CONNECT_TIMEOUT,
};

/// Messages pulled per `fetch_inbound` page.
const HISTORY_PAGE: usize = 100;

/// How a peer address resolves to something the protocol can send to.
///
/// * `@username` — resolved through the directory
/// * `packed:<b64>` — a packed chat captured at prospect-import time
enum PeerAddress {
    Username(String),
    Packed(PackedChat),
}

fn parse_peer(address: &str) -> Result<PeerAddress> {
    if let Some(name) = address.strip_prefix('@') {
        if name.is_empty() {
            return Err(SessionError::RecipientInvalid(address.to_string()));
        }
        return Ok(PeerAddress::Username(name.to_string()));
    }
    if let Some(b64) = address.strip_prefix("packed:") {
        let bytes = B64
            .decode(b64)
            .map_err(|e| SessionError::RecipientInvalid(format!("{address}: {e}")))?;
        let packed = PackedChat::from_bytes(&bytes)
            .map_err(|_| SessionError::RecipientInvalid(format!("bad packed peer: {address}")))?;
        return Ok(PeerAddress::Packed(packed));
    }
    Err(SessionError::RecipientInvalid(format!(
        "telegram needs @username or packed peer, got {address:?}"
    )))
}

/// Encode a packed chat as a portable peer address.
pub fn packed_address(packed: PackedChat) -> String {
    format!("packed:{}", B64.encode(packed.to_bytes()))
}

fn proto(e: impl std::fmt::Display) -> SessionError {
    SessionError::Protocol(e.to_string())
}

fn profile_of(user: &User) -> SessionProfile {
    SessionProfile {
        display_name: Some(user.full_name()),
        username: user.username().map(String::from),
        phone: user.phone().map(String::from),
    }
}

/// One MTProto client session. `Client` is internally shared, so this handle
/// is cheap to clone into the send queue and the poller.
pub struct TelegramSession {
    key: SessionKey,
    client: Client,
}

impl TelegramSession {
    /// Connect with the stored session blob (if any). Returns the session and
    /// whether the account is already authorised.
    pub async fn connect(key: SessionKey, creds: &TelegramCredentials) -> Result<(Self, bool)> {
        let session = match &creds.session_string {
            Some(blob) => {
                let bytes = B64
                    .decode(blob)
                    .map_err(|e| SessionError::AuthFailed(format!("session blob: {e}")))?;
                Session::load(&bytes)
                    .map_err(|e| SessionError::AuthFailed(format!("session load: {e}")))?
            }
            None => Session::new(),
        };

        let client = tokio::time::timeout(
            MTPROTO_CONNECT_TIMEOUT,
            Client::connect(Config {
                session,
                api_id: creds.api_id,
                api_hash: creds.api_hash.clone(),
                params: InitParams::default(),
            }),
        )
        .await
        .map_err(|_| SessionError::Timeout {
            secs: MTPROTO_CONNECT_TIMEOUT.as_secs(),
        })?
        .map_err(proto)?;

        let authorized = client.is_authorized().await.map_err(proto)?;
        debug!(key = %key, authorized, "telegram client connected");
        Ok((Self { key, client }, authorized))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Serialise the live session for persistence inside the encrypted
    /// credentials blob.
    pub fn export_session(&self) -> String {
        B64.encode(self.client.session().save())
    }

    /// Request a login code for the configured phone number.
    pub async fn request_code(&self, phone: &str) -> Result<LoginToken> {
        self.client
            .request_login_code(phone)
            .await
            .map_err(|e| SessionError::AuthFailed(e.to_string()))
    }

    /// Submit the login code. `Ok(None)` means a 2FA password is still
    /// required (the returned token continues the flow).
    pub async fn submit_code(
        &self,
        token: &LoginToken,
        code: &str,
    ) -> Result<std::result::Result<SessionProfile, PasswordToken>> {
        match self.client.sign_in(token, code).await {
            Ok(user) => Ok(Ok(profile_of(&user))),
            Err(SignInError::PasswordRequired(password_token)) => Ok(Err(password_token)),
            Err(SignInError::InvalidCode) => Err(SessionError::CodeExpired),
            Err(e) => Err(SessionError::AuthFailed(e.to_string())),
        }
    }

    /// Submit the 2FA password.
    pub async fn submit_password(
        &self,
        token: PasswordToken,
        password: &str,
    ) -> Result<SessionProfile> {
        match self.client.check_password(token, password).await {
            Ok(user) => Ok(profile_of(&user)),
            Err(SignInError::InvalidPassword) => {
                Err(SessionError::AuthFailed("invalid password".to_string()))
            }
            Err(e) => Err(SessionError::AuthFailed(e.to_string())),
        }
    }

    pub async fn is_authorized(&self) -> bool {
        self.client.is_authorized().await.unwrap_or(false)
    }

    pub async fn profile(&self) -> Option<SessionProfile> {
        self.client.get_me().await.ok().map(|u| profile_of(&u))
    }

    /// Groups the account participates in.
    pub async fn list_groups(&self) -> Result<Vec<GroupInfo>> {
        let mut dialogs = self.client.iter_dialogs();
        let mut groups = Vec::new();
        while let Some(dialog) = dialogs.next().await.map_err(proto)? {
            if let Chat::Group(group) = dialog.chat() {
                groups.push(GroupInfo {
                    id: packed_address(dialog.chat().pack()),
                    title: group.title().to_string(),
                    member_count: None,
                });
            }
        }
        Ok(groups)
    }

    /// Members of a group, honouring the protocol's participant-visibility
    /// rules: a group whose admins restrict the member list fails with
    /// `AdminRequired`.
    pub async fn list_group_members(&self, group_id: &str) -> Result<Vec<GroupMember>> {
        let PeerAddress::Packed(packed) = parse_peer(group_id)? else {
            return Err(SessionError::RecipientInvalid(format!(
                "group reference must be a packed peer: {group_id}"
            )));
        };

        let mut participants = self.client.iter_participants(packed);
        let mut members = Vec::new();
        loop {
            match participants.next().await {
                Ok(Some(participant)) => {
                    let user = participant.user;
                    members.push(GroupMember {
                        display_name: user.full_name(),
                        username: user.username().map(String::from),
                        phone: user.phone().map(String::from),
                        telegram_user_id: Some(user.id()),
                        peer_address: packed_address(user.pack()),
                    });
                }
                Ok(None) => break,
                Err(e) if e.to_string().contains("CHAT_ADMIN_REQUIRED") => {
                    return Err(SessionError::AdminRequired)
                }
                Err(e) => return Err(proto(e)),
            }
        }
        Ok(members)
    }

    /// Inbound messages from `peer` with id strictly above `since`,
    /// ascending. History pages newest-first, so iteration stops at the
    /// watermark and the page is reversed.
    pub async fn fetch_inbound(&self, peer: &str, since: &str) -> Result<Vec<InboundMessage>> {
        let chat = self.resolve(peer).await?;
        let mut history = self.client.iter_messages(chat).limit(HISTORY_PAGE);
        let mut out = Vec::new();
        while let Some(message) = history.next().await.map_err(proto)? {
            let external = message_external_id(message.id());
            if external.as_str() <= since {
                break;
            }
            if message.outgoing() {
                continue;
            }
            out.push(InboundMessage {
                external_id: external,
                body: message.text().to_string(),
                timestamp: message.date(),
            });
        }
        out.reverse();
        Ok(out)
    }

    /// Best-effort remote logout, then local teardown is the caller's job.
    pub async fn sign_out(&self) {
        if let Err(e) = self.client.sign_out().await {
            warn!(key = %self.key, error = %e, "telegram remote logout failed");
        } else {
            info!(key = %self.key, "telegram remote logout complete");
        }
    }

    async fn resolve(&self, address: &str) -> Result<PackedChat> {
        match parse_peer(address)? {
            PeerAddress::Packed(packed) => Ok(packed),
            PeerAddress::Username(name) => {
                let chat = self
                    .client
                    .resolve_username(&name)
                    .await
                    .map_err(proto)?
                    .ok_or_else(|| {
                        SessionError::RecipientInvalid(format!("unknown username @{name}"))
                    })?;
                Ok(chat.pack())
            }
        }
    }
}

/// Telegram message ids are per-chat monotonic across both directions;
/// zero-padding keeps string comparison equal to numeric order.
pub fn message_external_id(id: i32) -> String {
    format!("{:010}", id.max(0))
}

#[async_trait]
impl DirectSender for TelegramSession {
    async fn send_now(&self, to: &str, body: &str) -> Result<SessionReceipt> {
        let chat = self.resolve(to).await?;
        let sent = self
            .client
            .send_message(chat, body)
            .await
            .map_err(|e| match e.to_string() {
                s if s.contains("AUTH_KEY") || s.contains("SESSION_REVOKED") => {
                    SessionError::AuthFailed(s)
                }
                s if s.contains("PEER_ID_INVALID") => SessionError::RecipientInvalid(s),
                s => SessionError::Protocol(s),
            })?;
        debug!(key = %self.key, to, msg_id = sent.id(), "telegram message sent");
        Ok(SessionReceipt {
            // The protocol acked the send, which is as strong as a marker.
            external_id: message_external_id(sent.id()),
            delivered_marker_seen: true,
        })
    }
}

/// Clone-able handle the registry's send queue owns.
pub struct TelegramDirect(pub Arc<TelegramSession>);

#[async_trait]
impl DirectSender for TelegramDirect {
    async fn send_now(&self, to: &str, body: &str) -> Result<SessionReceipt> {
        self.0.send_now(to, body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_ids_are_string_monotonic() {
        assert!(message_external_id(9) < message_external_id(10));
        assert!(message_external_id(99) < message_external_id(100));
        assert!(message_external_id(1) < message_external_id(2_000_000_000));
    }

    #[test]
    fn peer_parsing_accepts_username_and_packed() {
        assert!(matches!(
            parse_peer("@ann").unwrap(),
            PeerAddress::Username(ref n) if n == "ann"
        ));
        assert!(parse_peer("@").is_err());
        assert!(parse_peer("15550001111").is_err());
        assert!(parse_peer("packed:!!!not-base64").is_err());
    }
}
