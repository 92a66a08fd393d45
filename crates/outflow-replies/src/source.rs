use async_trait::async_trait;

use outflow_core::TenantId;
use outflow_sessions::{InboundMessage, SessionError, SessionRegistry};

/// Seam to the session registry for polling, so tests can script inbound
/// traffic without a live browser or MTProto client.
#[async_trait]
pub trait InboundSource: Send + Sync {
    /// Verify (or reconstruct) the session. Failure is transient: the poll
    /// retries next cycle.
    async fn ensure_ready(
        &self,
        tenant: &TenantId,
        channel_config_id: &str,
    ) -> Result<(), SessionError>;

    /// Inbound messages from `peer` strictly above `since`, ascending.
    async fn fetch_inbound(
        &self,
        tenant: &TenantId,
        channel_config_id: &str,
        peer: &str,
        since: &str,
    ) -> Result<Vec<InboundMessage>, SessionError>;
}

#[async_trait]
impl InboundSource for SessionRegistry {
    async fn ensure_ready(
        &self,
        tenant: &TenantId,
        channel_config_id: &str,
    ) -> Result<(), SessionError> {
        SessionRegistry::ensure_ready(self, tenant, channel_config_id).await
    }

    async fn fetch_inbound(
        &self,
        tenant: &TenantId,
        channel_config_id: &str,
        peer: &str,
        since: &str,
    ) -> Result<Vec<InboundMessage>, SessionError> {
        SessionRegistry::fetch_inbound(self, tenant, channel_config_id, peer, since).await
    }
}
