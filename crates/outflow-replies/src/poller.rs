use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use outflow_campaigns::store::AttemptDraft;
use outflow_campaigns::{AttemptStatus, CampaignStore};
use outflow_channels::types::ChannelConfig;
use outflow_channels::ChannelStore;
use outflow_contacts::{ContactStore, Prospect};
use outflow_core::{Direction, TenantId};
use outflow_queue::{
    EnqueueOptions, Job, JobDisposition, JobHandler, JobKind, JobQueue,
};
use outflow_sessions::InboundMessage;

use crate::error::Result;
use crate::source::InboundSource;

/// Peers visited per poll cycle; the rest continue next cycle by watermark
/// ordering.
const PEER_CAP: usize = 100;
/// Polls lease slightly ahead of campaign steps so a busy queue cannot
/// starve reply ingestion.
const POLL_PRIORITY: i64 = 3;

/// Payload of a POLL_REPLIES job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollPayload {
    pub tenant_id: String,
    pub channel_config_id: String,
}

/// The reply poller: one recurring job per eligible session-kind config.
pub struct ReplyPoller {
    channels: Arc<ChannelStore>,
    contacts: Arc<ContactStore>,
    campaigns: Arc<CampaignStore>,
    queue: Arc<JobQueue>,
    source: Arc<dyn InboundSource>,
}

impl ReplyPoller {
    pub fn new(
        channels: Arc<ChannelStore>,
        contacts: Arc<ContactStore>,
        campaigns: Arc<CampaignStore>,
        queue: Arc<JobQueue>,
        source: Arc<dyn InboundSource>,
    ) -> Self {
        Self {
            channels,
            contacts,
            campaigns,
            queue,
            source,
        }
    }

    /// Make sure exactly one live POLL_REPLIES job exists per session-kind
    /// config with reply polling enabled. Called at boot and whenever a
    /// channel config changes.
    pub fn ensure_poll_jobs(&self) -> Result<usize> {
        let live = self.queue.find_live(JobKind::PollReplies)?;
        let covered: Vec<String> = live
            .iter()
            .filter_map(|j| {
                j.payload
                    .get("channel_config_id")
                    .and_then(|v| v.as_str())
                    .map(String::from)
            })
            .collect();

        let mut seeded = 0;
        for config in self.channels.list_session_configs()? {
            if !config.settings.reply_polling.enabled {
                continue;
            }
            if covered.contains(&config.id) {
                continue;
            }
            let payload = serde_json::to_value(PollPayload {
                tenant_id: config.tenant_id.clone(),
                channel_config_id: config.id.clone(),
            })?;
            self.queue.enqueue(
                JobKind::PollReplies,
                payload,
                EnqueueOptions {
                    tenant_id: Some(TenantId::from(config.tenant_id.clone())),
                    priority: POLL_PRIORITY,
                    ..Default::default()
                },
            )?;
            info!(config_id = %config.id, "reply poll job seeded");
            seeded += 1;
        }
        Ok(seeded)
    }

    /// Enqueue a poll job for one config right away (channel-config change
    /// path). Skips if a live job already covers it.
    pub fn enqueue_reply_poll(&self, tenant: &TenantId, channel_config_id: &str) -> Result<bool> {
        let live = self.queue.find_live(JobKind::PollReplies)?;
        let covered = live.iter().any(|j| {
            j.payload.get("channel_config_id").and_then(|v| v.as_str()) == Some(channel_config_id)
        });
        if covered {
            return Ok(false);
        }
        let payload = serde_json::to_value(PollPayload {
            tenant_id: tenant.to_string(),
            channel_config_id: channel_config_id.to_string(),
        })?;
        self.queue.enqueue(
            JobKind::PollReplies,
            payload,
            EnqueueOptions {
                tenant_id: Some(tenant.clone()),
                priority: POLL_PRIORITY,
                ..Default::default()
            },
        )?;
        info!(config_id = %channel_config_id, "reply poll job enqueued");
        Ok(true)
    }

    /// One poll cycle for one config.
    async fn poll(&self, tenant: &TenantId, config: &ChannelConfig) -> JobDisposition {
        let interval =
            Duration::minutes(config.settings.reply_polling.interval_minutes.max(1) as i64);
        let next = || JobDisposition::Reschedule {
            run_after: Utc::now() + interval,
        };

        // Session first; a dead session fails transiently and retries next
        // cycle without burning the retry budget.
        if let Err(e) = self.source.ensure_ready(tenant, &config.id).await {
            warn!(config_id = %config.id, error = %e, "reply poll skipped: session not ready");
            return next();
        }

        let peers = match self
            .contacts
            .prospects_for_polling(tenant, &config.id, PEER_CAP)
        {
            Ok(p) => p,
            Err(e) => {
                warn!(config_id = %config.id, error = %e, "reply poll could not list peers");
                return next();
            }
        };
        if peers.is_empty() {
            return next();
        }

        let auto_convert = config.settings.auto_convert.enabled;
        let mut ingested = 0usize;
        for prospect in &peers {
            if !prospect.is_sendable() {
                continue;
            }
            let since = prospect
                .last_watermark_external_id
                .as_deref()
                .unwrap_or_default();
            let inbound = match self
                .source
                .fetch_inbound(tenant, &config.id, &prospect.peer_address, since)
                .await
            {
                Ok(msgs) => msgs,
                Err(e) => {
                    // One bad peer must not stop the cycle.
                    warn!(config_id = %config.id, peer = %prospect.peer_address, error = %e,
                          "fetch_inbound failed, peer continues next cycle");
                    continue;
                }
            };
            for message in inbound {
                match self.ingest(tenant, config, prospect, &message, auto_convert) {
                    Ok(()) => ingested += 1,
                    Err(e) => {
                        warn!(config_id = %config.id, external_id = %message.external_id,
                              error = %e, "inbound message ingestion failed");
                        // Watermark not advanced; the message returns next
                        // cycle.
                        break;
                    }
                }
            }
        }

        if ingested > 0 {
            info!(config_id = %config.id, ingested, "inbound replies ingested");
        } else {
            debug!(config_id = %config.id, peers = peers.len(), "reply poll found nothing new");
        }
        next()
    }

    /// Apply one inbound message: conversation append, attempt rows,
    /// attribution, status propagation, optional conversion, watermark.
    fn ingest(
        &self,
        tenant: &TenantId,
        config: &ChannelConfig,
        prospect: &Prospect,
        message: &InboundMessage,
        auto_convert: bool,
    ) -> Result<()> {
        let conversation = self.contacts.ensure_open_conversation(
            tenant,
            config.kind,
            &config.id,
            None,
            Some(&prospect.id),
            prospect.converted_lead_id.as_deref(),
        )?;
        self.contacts.append_message(
            &conversation.id,
            Direction::Inbound,
            &message.body,
            Some(&message.external_id),
            message.timestamp,
        )?;

        self.campaigns.append_attempt(
            tenant,
            config.kind,
            Direction::Inbound,
            AttemptStatus::Delivered,
            AttemptDraft {
                lead_id: prospect.converted_lead_id.clone(),
                body: message.body.clone(),
                external_id: Some(message.external_id.clone()),
                replied_at: Some(message.timestamp),
                ..Default::default()
            },
        )?;

        // Attribution: the most recent outbound attempt still waiting for a
        // reply gets this message's time.
        if let Some(attempt_id) =
            self.campaigns
                .latest_unanswered_outbound(tenant, None, Some(&prospect.id))?
        {
            self.campaigns
                .set_attempt_replied(tenant, &attempt_id, message.timestamp)?;
        }

        self.contacts
            .mark_prospect_replied(tenant, &prospect.id, message.timestamp)?;
        let stopped = self
            .campaigns
            .mark_replied_by_prospect(tenant, &prospect.id)?;
        if stopped > 0 {
            debug!(prospect_id = %prospect.id, stopped, "campaign recipients short-circuited by reply");
        }

        if auto_convert {
            self.contacts.convert_prospect(tenant, &prospect.id)?;
        }

        self.contacts
            .advance_prospect_watermark(tenant, &prospect.id, &message.external_id)?;
        Ok(())
    }
}

#[async_trait]
impl JobHandler for ReplyPoller {
    fn kind(&self) -> JobKind {
        JobKind::PollReplies
    }

    async fn run(&self, job: &Job) -> JobDisposition {
        let payload: PollPayload = match serde_json::from_value(job.payload.clone()) {
            Ok(p) => p,
            Err(e) => {
                return JobDisposition::Fail {
                    error: format!("unparseable poll payload: {e}"),
                }
            }
        };
        let tenant = TenantId::from(payload.tenant_id.clone());

        let config = match self.channels.get(&tenant, &payload.channel_config_id) {
            Ok(c) => c,
            // Config deleted: the poll job dies with it.
            Err(_) => return JobDisposition::Complete,
        };
        if !config.active
            || !config.kind.is_session_based()
            || !config.settings.reply_polling.enabled
        {
            return JobDisposition::Complete;
        }

        self.poll(&tenant, &config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outflow_channels::types::{ChannelSettings, Credentials, TelegramCredentials};
    use outflow_channels::types::{AutoConvert, ReplyPolling};
    use outflow_contacts::ProspectStatus;
    use outflow_core::ChannelKind;
    use outflow_sessions::SessionError;
    use outflow_vault::CredentialVault;
    use rusqlite::Connection;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Scripted inbound traffic per peer address, honouring the watermark.
    struct FakeSource {
        ready: bool,
        messages: Mutex<HashMap<String, Vec<InboundMessage>>>,
    }

    #[async_trait]
    impl InboundSource for FakeSource {
        async fn ensure_ready(
            &self,
            _tenant: &TenantId,
            _channel_config_id: &str,
        ) -> std::result::Result<(), SessionError> {
            if self.ready {
                Ok(())
            } else {
                Err(SessionError::NotConnected("scripted".into()))
            }
        }

        async fn fetch_inbound(
            &self,
            _tenant: &TenantId,
            _channel_config_id: &str,
            peer: &str,
            since: &str,
        ) -> std::result::Result<Vec<InboundMessage>, SessionError> {
            let map = self.messages.lock().unwrap();
            Ok(map
                .get(peer)
                .map(|msgs| {
                    msgs.iter()
                        .filter(|m| m.external_id.as_str() > since)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default())
        }
    }

    struct Harness {
        poller: ReplyPoller,
        channels: Arc<ChannelStore>,
        contacts: Arc<ContactStore>,
        campaigns: Arc<CampaignStore>,
        queue: Arc<JobQueue>,
        tenant: TenantId,
        config_id: String,
        prospect_id: String,
    }

    fn msg(id: &str, body: &str) -> InboundMessage {
        InboundMessage {
            external_id: id.to_string(),
            body: body.to_string(),
            timestamp: Utc::now(),
        }
    }

    fn harness(ready: bool, auto_convert: bool, traffic: Vec<(&str, Vec<InboundMessage>)>) -> Harness {
        let channels = Arc::new(
            ChannelStore::new(
                Connection::open_in_memory().unwrap(),
                Arc::new(CredentialVault::new(&[8u8; 32])),
            )
            .unwrap(),
        );
        let contacts =
            Arc::new(ContactStore::new(Connection::open_in_memory().unwrap()).unwrap());
        let campaigns =
            Arc::new(CampaignStore::new(Connection::open_in_memory().unwrap()).unwrap());
        let queue = Arc::new(JobQueue::new(Connection::open_in_memory().unwrap()).unwrap());

        let tenant = TenantId(contacts.create_tenant("acme", 0).unwrap().id);
        let config = channels
            .create(
                &tenant,
                ChannelKind::Telegram,
                "tg",
                &Credentials::Telegram(TelegramCredentials {
                    api_id: 1,
                    api_hash: "h".into(),
                    phone_number: "+15550001111".into(),
                    session_string: Some("blob".into()),
                }),
                &ChannelSettings {
                    reply_polling: ReplyPolling {
                        enabled: true,
                        interval_minutes: 5,
                    },
                    auto_convert: AutoConvert {
                        enabled: auto_convert,
                    },
                    ..Default::default()
                },
            )
            .unwrap();

        let group = contacts
            .create_prospect_group(&tenant, &config.id, ChannelKind::Telegram, "packed:g", "G")
            .unwrap();
        let prospect = contacts
            .upsert_prospect(
                &tenant,
                &group.id,
                ChannelKind::Telegram,
                "Ann Onym",
                Some("ann"),
                None,
                Some(42),
                "@ann",
            )
            .unwrap();
        // The campaign engine messaged this prospect already.
        contacts
            .mark_prospect_messaged(&tenant, &prospect.id, Utc::now(), Some("0000000010"))
            .unwrap();

        let source = Arc::new(FakeSource {
            ready,
            messages: Mutex::new(
                traffic
                    .into_iter()
                    .map(|(peer, msgs)| (peer.to_string(), msgs))
                    .collect(),
            ),
        });
        let poller = ReplyPoller::new(
            Arc::clone(&channels),
            Arc::clone(&contacts),
            Arc::clone(&campaigns),
            Arc::clone(&queue),
            source,
        );

        Harness {
            poller,
            channels,
            contacts,
            campaigns,
            queue,
            tenant,
            config_id: config.id,
            prospect_id: prospect.id,
        }
    }

    fn poll_job(h: &Harness) -> Job {
        h.poller.ensure_poll_jobs().unwrap();
        h.queue
            .lease("t", &[JobKind::PollReplies], 1, std::time::Duration::from_secs(60))
            .unwrap()
            .remove(0)
    }

    #[tokio::test]
    async fn ensure_poll_jobs_is_singleton_per_config() {
        let h = harness(true, false, vec![]);
        assert_eq!(h.poller.ensure_poll_jobs().unwrap(), 1);
        assert_eq!(h.poller.ensure_poll_jobs().unwrap(), 0);
        assert_eq!(h.queue.find_live(JobKind::PollReplies).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dead_session_retries_next_cycle() {
        let h = harness(false, false, vec![]);
        let job = poll_job(&h);
        match h.poller.run(&job).await {
            JobDisposition::Reschedule { run_after } => {
                let mins = (run_after - Utc::now()).num_minutes();
                assert!((4..=5).contains(&mins));
            }
            other => panic!("expected Reschedule, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_peer_set_reschedules_quickly() {
        let h = harness(true, false, vec![]);
        // No watermarked traffic for the peer → nothing ingested.
        let job = poll_job(&h);
        let d = h.poller.run(&job).await;
        assert!(matches!(d, JobDisposition::Reschedule { .. }));
    }

    #[tokio::test]
    async fn reply_is_ingested_attributed_and_short_circuits() {
        let h = harness(
            true,
            false,
            vec![("@ann", vec![msg("0000000011", "interested, tell me more")])],
        );

        // Outbound attempt + live recipient, as the engine would have left.
        let campaign = h
            .campaigns
            .create_campaign(
                &h.tenant,
                "tg-outreach",
                outflow_campaigns::CampaignType::Immediate,
                None,
                0,
            )
            .unwrap();
        h.campaigns
            .add_recipients(
                &h.tenant,
                &campaign.id,
                &[outflow_campaigns::RecipientTarget::prospect(&h.prospect_id)],
            )
            .unwrap();
        let recipient = &h.campaigns.pending_recipients(&h.tenant, &campaign.id).unwrap()[0];
        let outbound = h
            .campaigns
            .append_attempt(
                &h.tenant,
                ChannelKind::Telegram,
                Direction::Outbound,
                AttemptStatus::Sent,
                AttemptDraft {
                    campaign_id: Some(campaign.id.clone()),
                    recipient_id: Some(recipient.id.clone()),
                    body: "step 1".into(),
                    external_id: Some("0000000010".into()),
                    sent_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .unwrap();

        let job = poll_job(&h);
        let d = h.poller.run(&job).await;
        assert!(matches!(d, JobDisposition::Reschedule { .. }));

        // Prospect and recipient flipped to REPLIED.
        let prospect = h.contacts.get_prospect(&h.tenant, &h.prospect_id).unwrap();
        assert_eq!(prospect.status, ProspectStatus::Replied);
        assert!(prospect.last_replied_at.is_some());
        let recipient = h.campaigns.get_recipient(&h.tenant, &recipient.id).unwrap();
        assert_eq!(
            recipient.status,
            outflow_campaigns::RecipientStatus::Replied
        );

        // The outbound attempt got the reply time.
        let attempts = h
            .campaigns
            .attempts_for_recipient(&h.tenant, &recipient.id)
            .unwrap();
        let replied = attempts.iter().find(|a| a.id == outbound.id).unwrap();
        assert!(replied.replied_at.is_some());

        // Message landed in the open conversation.
        let conversation = h
            .contacts
            .ensure_open_conversation(
                &h.tenant,
                ChannelKind::Telegram,
                &h.config_id,
                None,
                Some(&h.prospect_id),
                None,
            )
            .unwrap();
        let messages = h.contacts.messages(&conversation.id).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "interested, tell me more");

        // Watermark advanced past the ingested message.
        assert_eq!(
            prospect.last_watermark_external_id.as_deref(),
            Some("0000000011")
        );

        // A second cycle ingests nothing new.
        let job2 = h.queue.get(&job.id).unwrap();
        let _ = h.poller.run(&job2).await;
        let messages = h.contacts.messages(&conversation.id).unwrap();
        assert_eq!(messages.len(), 1, "watermark must prevent re-ingestion");
    }

    #[tokio::test]
    async fn auto_convert_creates_exactly_one_lead() {
        let h = harness(
            true,
            true,
            vec![(
                "@ann",
                vec![msg("0000000011", "first"), msg("0000000012", "second")],
            )],
        );

        let job = poll_job(&h);
        let _ = h.poller.run(&job).await;

        let prospect = h.contacts.get_prospect(&h.tenant, &h.prospect_id).unwrap();
        assert_eq!(prospect.status, ProspectStatus::Converted);
        let lead_id = prospect.converted_lead_id.expect("lead must exist");
        let lead = h.contacts.get_lead(&h.tenant, &lead_id).unwrap();
        assert_eq!(lead.company_name, "Ann Onym");

        // Replying again later does not create another lead.
        {
            let mut map = HashMap::new();
            map.insert(
                "@ann".to_string(),
                vec![msg("0000000013", "third message")],
            );
            // Rebuild the poller with fresh traffic but the same stores.
            let source = Arc::new(FakeSource {
                ready: true,
                messages: Mutex::new(map),
            });
            let poller = ReplyPoller::new(
                Arc::clone(&h.channels),
                Arc::clone(&h.contacts),
                Arc::clone(&h.campaigns),
                Arc::clone(&h.queue),
                source,
            );
            let job2 = h.queue.get(&job.id).unwrap();
            let _ = poller.run(&job2).await;
        }

        let prospect = h.contacts.get_prospect(&h.tenant, &h.prospect_id).unwrap();
        assert_eq!(prospect.converted_lead_id.as_deref(), Some(lead_id.as_str()));
    }

    #[tokio::test]
    async fn obsolete_config_completes_the_job() {
        let h = harness(true, false, vec![]);
        let job = poll_job(&h);
        h.channels
            .set_active(&h.tenant, &h.config_id, false)
            .unwrap();
        assert_eq!(h.poller.run(&job).await, JobDisposition::Complete);
    }
}
