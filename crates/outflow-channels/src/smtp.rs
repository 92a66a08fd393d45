use async_trait::async_trait;
use dashmap::DashMap;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials as SmtpAuth;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::debug;
use uuid::Uuid;

use outflow_core::{ChannelKind, RenderedMessage};

use crate::adapter::{AdapterError, ChannelAdapter, SendReceipt};
use crate::types::{ChannelConfig, Credentials, SmtpCredentials};

/// SMTP adapter. Keeps one pooled transport per channel config; the pool is
/// private to this adapter and lives for the process.
pub struct SmtpAdapter {
    transports: DashMap<String, AsyncSmtpTransport<Tokio1Executor>>,
}

impl SmtpAdapter {
    pub fn new() -> Self {
        Self {
            transports: DashMap::new(),
        }
    }

    fn transport_for(
        &self,
        config_id: &str,
        creds: &SmtpCredentials,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>, AdapterError> {
        if let Some(t) = self.transports.get(config_id) {
            return Ok(t.clone());
        }
        let builder = if creds.secure {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&creds.host)
                .map_err(|e| AdapterError::Network(format!("smtp relay setup: {e}")))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&creds.host)
        };
        let transport = builder
            .port(creds.port)
            .credentials(SmtpAuth::new(creds.user.clone(), creds.pass.clone()))
            .build();
        self.transports
            .insert(config_id.to_string(), transport.clone());
        debug!(config_id, host = %creds.host, "smtp transport created");
        Ok(transport)
    }

    /// Sender mailbox: settings override credentials.
    fn from_mailbox(
        config: &ChannelConfig,
        creds: &SmtpCredentials,
    ) -> Result<Mailbox, AdapterError> {
        let email = config
            .settings
            .from_email
            .as_deref()
            .unwrap_or(&creds.from_email);
        let name = config
            .settings
            .from_name
            .as_deref()
            .or(creds.from_name.as_deref());
        let raw = match name {
            Some(n) => format!("{n} <{email}>"),
            None => email.to_string(),
        };
        raw.parse()
            .map_err(|e| AdapterError::Rejected(format!("invalid from address: {e}")))
    }
}

impl Default for SmtpAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelAdapter for SmtpAdapter {
    fn kind(&self) -> ChannelKind {
        ChannelKind::EmailSmtp
    }

    async fn send(
        &self,
        config: &ChannelConfig,
        creds: &Credentials,
        to: &str,
        message: &RenderedMessage,
    ) -> Result<SendReceipt, AdapterError> {
        let Credentials::Smtp(creds) = creds else {
            return Err(AdapterError::Rejected(
                "credentials are not SMTP-shaped".to_string(),
            ));
        };

        let to_mailbox: Mailbox = to
            .parse()
            .map_err(|e| AdapterError::RecipientInvalid(format!("{to}: {e}")))?;

        let email = Message::builder()
            .from(Self::from_mailbox(config, creds)?)
            .to(to_mailbox)
            .subject(message.subject.as_deref().unwrap_or_default())
            .header(ContentType::TEXT_HTML)
            .body(message.body.clone())
            .map_err(|e| AdapterError::Rejected(format!("message build: {e}")))?;

        let transport = self.transport_for(&config.id, creds)?;
        transport.send(email).await.map_err(|e| {
            if e.is_permanent() {
                AdapterError::Rejected(format!("smtp rejected: {e}"))
            } else {
                AdapterError::Network(format!("smtp send: {e}"))
            }
        })?;

        // SMTP gives no durable provider id; synthesize one so the attempt
        // row always has an external_id.
        Ok(SendReceipt::new(format!("smtp-{}", Uuid::new_v4())))
    }
}
