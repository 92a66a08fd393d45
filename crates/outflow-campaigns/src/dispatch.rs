use async_trait::async_trait;

use outflow_channels::Outcome;
use outflow_core::{RenderedMessage, TenantId};

/// Seam between the engine and the send gateway, so the engine depends on an
/// interface rather than on the channel stack (and tests can script
/// outcomes).
#[async_trait]
pub trait OutboundDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        tenant: &TenantId,
        channel_config_id: &str,
        to: &str,
        message: &RenderedMessage,
    ) -> Outcome;
}

#[async_trait]
impl OutboundDispatcher for outflow_channels::Dispatcher {
    async fn dispatch(
        &self,
        tenant: &TenantId,
        channel_config_id: &str,
        to: &str,
        message: &RenderedMessage,
    ) -> Outcome {
        outflow_channels::Dispatcher::dispatch(self, tenant, channel_config_id, to, message).await
    }
}
