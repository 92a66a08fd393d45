use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use outflow_channels::{ChannelStore, ErrorKind, Outcome};
use outflow_contacts::{Contact, ContactStore, Lead, LeadFilter, Prospect, ProspectStatus};
use outflow_core::{ChannelKind, Direction, TenantId};
use outflow_queue::{EnqueueOptions, Job, JobDisposition, JobHandler, JobKind, JobQueue};

use crate::dispatch::OutboundDispatcher;
use crate::error::{CampaignError, Result};
use crate::render::{render, RenderContext};
use crate::schedule::{resolve_send_time, stagger_times, step_delay, SendWindow};
use crate::store::{AttemptDraft, CampaignStore};
use crate::types::*;

/// Soft-pause retry: a leased job for a non-active campaign comes back after
/// this long instead of churning.
const PAUSE_RETRY_SECS: i64 = 30;
/// Quota exhaustion backs off longer than the normal retry ladder.
const QUOTA_RETRY: StdDuration = StdDuration::from_secs(900);

/// Payload of a CAMPAIGN_STEP job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepPayload {
    pub tenant_id: String,
    pub campaign_id: String,
    pub recipient_id: String,
}

/// The campaign execution engine. Owns all recipient/campaign state
/// transitions; everything it sends goes through the
/// [`OutboundDispatcher`] seam.
pub struct CampaignEngine {
    store: Arc<CampaignStore>,
    contacts: Arc<ContactStore>,
    channels: Arc<ChannelStore>,
    queue: Arc<JobQueue>,
    dispatcher: Arc<dyn OutboundDispatcher>,
}

impl CampaignEngine {
    pub fn new(
        store: Arc<CampaignStore>,
        contacts: Arc<ContactStore>,
        channels: Arc<ChannelStore>,
        queue: Arc<JobQueue>,
        dispatcher: Arc<dyn OutboundDispatcher>,
    ) -> Self {
        Self {
            store,
            contacts,
            channels,
            queue,
            dispatcher,
        }
    }

    pub fn store(&self) -> &Arc<CampaignStore> {
        &self.store
    }

    // --- enrolment (DRAFT only; all modes idempotent w.r.t. duplicates) ----

    pub fn add_recipients_by_contact_ids(
        &self,
        tenant: &TenantId,
        campaign_id: &str,
        contact_ids: &[String],
    ) -> Result<usize> {
        self.guard_draft(tenant, campaign_id, "add recipients")?;
        let mut targets = Vec::with_capacity(contact_ids.len());
        for contact_id in contact_ids {
            let contact = self.contacts.get_contact(tenant, contact_id)?;
            targets.push(RecipientTarget::contact(&contact.lead_id, &contact.id));
        }
        self.store.add_recipients(tenant, campaign_id, &targets)
    }

    pub fn add_recipients_by_lead_ids(
        &self,
        tenant: &TenantId,
        campaign_id: &str,
        lead_ids: &[String],
        primary_only: bool,
    ) -> Result<usize> {
        self.guard_draft(tenant, campaign_id, "add recipients")?;
        let contacts = self
            .contacts
            .contacts_for_leads(tenant, lead_ids, primary_only)?;
        let targets: Vec<_> = contacts
            .iter()
            .map(|c| RecipientTarget::contact(&c.lead_id, &c.id))
            .collect();
        self.store.add_recipients(tenant, campaign_id, &targets)
    }

    /// Filter enrolment resolves the filter *now* and snapshots it on the
    /// campaign; the set is never re-evaluated.
    pub fn add_recipients_by_filter(
        &self,
        tenant: &TenantId,
        campaign_id: &str,
        filter: &LeadFilter,
    ) -> Result<usize> {
        self.guard_draft(tenant, campaign_id, "add recipients")?;
        self.store
            .set_target_filter(tenant, campaign_id, &serde_json::to_value(filter)?)?;
        let leads = self.contacts.leads_matching(tenant, filter)?;
        let lead_ids: Vec<String> = leads.iter().map(|l| l.id.clone()).collect();
        let contacts = self.contacts.contacts_for_leads(tenant, &lead_ids, false)?;
        let targets: Vec<_> = contacts
            .iter()
            .map(|c| RecipientTarget::contact(&c.lead_id, &c.id))
            .collect();
        self.store.add_recipients(tenant, campaign_id, &targets)
    }

    pub fn add_recipients_by_prospect_groups(
        &self,
        tenant: &TenantId,
        campaign_id: &str,
        group_ids: &[String],
    ) -> Result<usize> {
        self.guard_draft(tenant, campaign_id, "add recipients")?;
        let prospects = self.contacts.prospects_in_groups(
            tenant,
            group_ids,
            &[ProspectStatus::Pending, ProspectStatus::Messaged],
        )?;
        let targets: Vec<_> = prospects
            .iter()
            .map(|p| RecipientTarget::prospect(&p.id))
            .collect();
        self.store.add_recipients(tenant, campaign_id, &targets)
    }

    // --- lifecycle ---------------------------------------------------------

    /// Start (from DRAFT) or resume (from PAUSED).
    ///
    /// Starting staggers every PENDING recipient's first step by
    /// `message_interval_seconds` from the campaign's base time and enqueues
    /// one CAMPAIGN_STEP job each. Resuming keeps the existing
    /// `next_action_at` values and only re-enqueues recipients whose job was
    /// lost.
    pub fn start_campaign(&self, tenant: &TenantId, campaign_id: &str) -> Result<()> {
        let campaign = self.store.get_campaign(tenant, campaign_id)?;
        match campaign.status {
            CampaignStatus::Draft | CampaignStatus::Paused => {}
            status => {
                return Err(CampaignError::InvalidState {
                    id: campaign_id.to_string(),
                    action: "start",
                    status: status.as_str().to_string(),
                })
            }
        }
        if self.store.step_count(campaign_id)? == 0 {
            return Err(CampaignError::NoSteps);
        }
        if self.store.recipient_count(tenant, campaign_id)? == 0 {
            return Err(CampaignError::NoRecipients);
        }

        let now = Utc::now();
        if campaign.status == CampaignStatus::Draft {
            let base = match campaign.campaign_type {
                CampaignType::Scheduled => campaign
                    .scheduled_at
                    .as_deref()
                    .and_then(parse_ts)
                    .unwrap_or(now),
                CampaignType::Immediate | CampaignType::Sequence => now,
            };
            let pending = self.store.pending_recipients(tenant, campaign_id)?;
            let times = stagger_times(base, pending.len(), campaign.message_interval_seconds);
            for (i, (recipient, at)) in pending.iter().zip(times).enumerate() {
                self.store.set_next_action(tenant, &recipient.id, Some(at))?;
                // Freshness-proportional priority: earlier recipients lease
                // first when a backlog builds.
                let priority = 5 + (i / 100) as i64;
                self.enqueue_step(tenant, campaign_id, &recipient.id, at, priority)?;
            }
            info!(campaign_id, recipients = pending.len(), "campaign started");
        } else {
            let covered: HashSet<String> = self
                .queue
                .find_live(JobKind::CampaignStep)?
                .iter()
                .filter_map(|j| {
                    j.payload
                        .get("recipient_id")
                        .and_then(|v| v.as_str())
                        .map(String::from)
                })
                .collect();
            let mut requeued = 0;
            for recipient in self.store.live_recipients(tenant, campaign_id)? {
                if covered.contains(&recipient.id) {
                    continue;
                }
                let at = recipient
                    .next_action_at
                    .as_deref()
                    .and_then(parse_ts)
                    .unwrap_or(now);
                self.enqueue_step(tenant, campaign_id, &recipient.id, at, 5)?;
                requeued += 1;
            }
            info!(campaign_id, requeued, "campaign resumed");
        }

        self.store.mark_campaign_started(tenant, campaign_id)?;
        Ok(())
    }

    /// ACTIVE → PAUSED. Idempotent; pending jobs stay queued and soft-retry
    /// against the status guard. In-flight sends are not cancelled.
    pub fn pause_campaign(&self, tenant: &TenantId, campaign_id: &str) -> Result<()> {
        let campaign = self.store.get_campaign(tenant, campaign_id)?;
        match campaign.status {
            CampaignStatus::Active => {
                self.store
                    .set_campaign_status(tenant, campaign_id, CampaignStatus::Paused)?;
                info!(campaign_id, "campaign paused");
                Ok(())
            }
            CampaignStatus::Paused => Ok(()),
            status => Err(CampaignError::InvalidState {
                id: campaign_id.to_string(),
                action: "pause",
                status: status.as_str().to_string(),
            }),
        }
    }

    // --- step processing (the worker body) ---------------------------------

    /// Execute one CAMPAIGN_STEP job. Never returns an error: everything
    /// folds into a job disposition, with store hiccups treated as transient.
    pub async fn process_step(&self, job: &Job) -> JobDisposition {
        let payload: StepPayload = match serde_json::from_value(job.payload.clone()) {
            Ok(p) => p,
            Err(e) => {
                return JobDisposition::Fail {
                    error: format!("unparseable step payload: {e}"),
                }
            }
        };
        let tenant = TenantId::from(payload.tenant_id.clone());
        match self.try_step(&tenant, &payload, job).await {
            Ok(disposition) => disposition,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "step processing hit a store error");
                JobDisposition::Retry {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn try_step(
        &self,
        tenant: &TenantId,
        payload: &StepPayload,
        job: &Job,
    ) -> Result<JobDisposition> {
        // Campaign guard: deleted → done; not active → soft retry.
        let campaign = match self.store.get_campaign(tenant, &payload.campaign_id) {
            Ok(c) => c,
            Err(CampaignError::CampaignNotFound { .. }) => return Ok(JobDisposition::Complete),
            Err(e) => return Err(e),
        };
        match campaign.status {
            CampaignStatus::Active => {}
            CampaignStatus::Completed => return Ok(JobDisposition::Complete),
            _ => {
                return Ok(JobDisposition::Reschedule {
                    run_after: Utc::now() + Duration::seconds(PAUSE_RETRY_SECS),
                })
            }
        }

        // Recipient guard: terminal states (including REPLIED, set by the
        // reply poller between steps) end the chain here.
        let recipient = match self.store.get_recipient(tenant, &payload.recipient_id) {
            Ok(r) => r,
            Err(CampaignError::RecipientNotFound { .. }) => return Ok(JobDisposition::Complete),
            Err(e) => return Err(e),
        };
        if !recipient.status.is_live() {
            return Ok(JobDisposition::Complete);
        }

        let total_steps = self.store.step_count(&campaign.id)?;
        if recipient.current_step > total_steps {
            self.store
                .set_recipient_status(tenant, &recipient.id, RecipientStatus::Completed)?;
            self.maybe_complete(tenant, &campaign.id)?;
            return Ok(JobDisposition::Complete);
        }
        let Some(step) = self.store.step_at(&campaign.id, recipient.current_step)? else {
            return self.fail_recipient(
                tenant,
                &campaign,
                None,
                &recipient,
                ErrorKind::Unknown,
                format!("step {} does not exist", recipient.current_step),
            );
        };

        // Resolved send time: max(now, next_action_at), snapped to the
        // step's tenant-local window.
        let now = Utc::now();
        let window = step
            .send_time
            .as_deref()
            .map(SendWindow::parse)
            .transpose()?;
        let offset = self
            .contacts
            .get_tenant(tenant)
            .map(|t| t.utc_offset_minutes)
            .unwrap_or(0);
        let next_action = recipient.next_action_at.as_deref().and_then(parse_ts);
        let resolved = resolve_send_time(now, next_action, window, offset);
        if resolved > now {
            return Ok(JobDisposition::Reschedule {
                run_after: resolved,
            });
        }

        // Render.
        let (contact, lead, prospect) = self.load_target(tenant, &recipient)?;
        let template = self.store.get_template(tenant, &step.template_id)?;
        let settings = self
            .channels
            .get(tenant, &step.channel_config_id)
            .map(|c| c.settings)
            .unwrap_or_default();
        let mut ctx = RenderContext::new()
            .with_sender(&settings)
            .with_unsubscribe_link(&settings, &recipient.id);
        if let Some(c) = &contact {
            ctx = ctx.with_contact(c);
        }
        if let Some(l) = &lead {
            ctx = ctx.with_lead(l);
        }
        if let Some(p) = &prospect {
            ctx = ctx.with_prospect(p);
        }
        let rendered = match render(&template, &ctx) {
            Ok(r) => r,
            Err(e) => {
                return self.fail_recipient(
                    tenant,
                    &campaign,
                    Some(&step),
                    &recipient,
                    ErrorKind::RenderError,
                    e.to_string(),
                )
            }
        };

        let Some(address) = recipient_address(step.channel_kind, contact.as_ref(), prospect.as_ref())
        else {
            return self.fail_recipient(
                tenant,
                &campaign,
                Some(&step),
                &recipient,
                ErrorKind::RecipientInvalid,
                format!("no usable {} address", step.channel_kind),
            );
        };

        self.store
            .set_recipient_status(tenant, &recipient.id, RecipientStatus::InProgress)?;

        let outcome = self
            .dispatcher
            .dispatch(tenant, &step.channel_config_id, &address, &rendered)
            .await;

        match outcome {
            Outcome::Sent { external_id } => self.handle_sent(
                tenant,
                &campaign,
                &step,
                &recipient,
                prospect.as_ref(),
                &rendered,
                &external_id,
                total_steps,
                now,
            ),
            Outcome::TransientFailure { kind, reason } => self.handle_transient(
                tenant, &campaign, &step, &recipient, job, kind, &reason,
            ),
            Outcome::PermanentFailure { kind, reason } => {
                self.fail_recipient(tenant, &campaign, Some(&step), &recipient, kind, reason)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_sent(
        &self,
        tenant: &TenantId,
        campaign: &Campaign,
        step: &CampaignStep,
        recipient: &Recipient,
        prospect: Option<&Prospect>,
        rendered: &outflow_core::RenderedMessage,
        external_id: &str,
        total_steps: u32,
        now: DateTime<Utc>,
    ) -> Result<JobDisposition> {
        self.store.append_attempt(
            tenant,
            step.channel_kind,
            Direction::Outbound,
            AttemptStatus::Sent,
            AttemptDraft {
                campaign_id: Some(campaign.id.clone()),
                campaign_step_id: Some(step.id.clone()),
                recipient_id: Some(recipient.id.clone()),
                lead_id: recipient.lead_id.clone(),
                contact_id: recipient.contact_id.clone(),
                subject: rendered.subject.clone(),
                body: rendered.body.clone(),
                external_id: Some(external_id.to_string()),
                sent_at: Some(now),
                ..Default::default()
            },
        )?;

        if let Some(prospect) = prospect {
            self.contacts
                .mark_prospect_messaged(tenant, &prospect.id, now, Some(external_id))?;
        }

        let next = recipient.current_step + 1;
        if next > total_steps {
            self.store
                .advance_recipient(tenant, &recipient.id, next, None)?;
            self.store
                .set_recipient_status(tenant, &recipient.id, RecipientStatus::Completed)?;
            self.maybe_complete(tenant, &campaign.id)?;
        } else {
            // Chain the next step only after this attempt is recorded: a
            // recipient never holds two live CAMPAIGN_STEP jobs.
            let next_step = self.store.step_at(&campaign.id, next)?;
            let next_at = match &next_step {
                Some(s) => now + step_delay(s),
                None => now,
            };
            self.store
                .advance_recipient(tenant, &recipient.id, next, Some(next_at))?;
            self.enqueue_step(tenant, &campaign.id, &recipient.id, next_at, 5)?;
        }
        Ok(JobDisposition::Complete)
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_transient(
        &self,
        tenant: &TenantId,
        campaign: &Campaign,
        step: &CampaignStep,
        recipient: &Recipient,
        job: &Job,
        kind: ErrorKind,
        reason: &str,
    ) -> Result<JobDisposition> {
        self.append_failure_attempt(tenant, campaign, Some(step), recipient, kind, reason)?;

        if job.attempts < job.max_attempts {
            let error = format!("{}: {reason}", kind.as_str());
            if kind == ErrorKind::QuotaExceeded {
                Ok(JobDisposition::RetryAfter {
                    error,
                    delay: QUOTA_RETRY,
                })
            } else {
                Ok(JobDisposition::Retry { error })
            }
        } else {
            self.store
                .set_recipient_status(tenant, &recipient.id, RecipientStatus::Failed)?;
            self.maybe_complete(tenant, &campaign.id)?;
            warn!(recipient_id = %recipient.id, %reason, "recipient failed after retries");
            Ok(JobDisposition::Fail {
                error: format!("{}: {reason}", kind.as_str()),
            })
        }
    }

    fn fail_recipient(
        &self,
        tenant: &TenantId,
        campaign: &Campaign,
        step: Option<&CampaignStep>,
        recipient: &Recipient,
        kind: ErrorKind,
        reason: String,
    ) -> Result<JobDisposition> {
        self.append_failure_attempt(tenant, campaign, step, recipient, kind, &reason)?;
        self.store
            .set_recipient_status(tenant, &recipient.id, RecipientStatus::Failed)?;
        self.maybe_complete(tenant, &campaign.id)?;
        warn!(recipient_id = %recipient.id, kind = kind.as_str(), %reason, "recipient failed permanently");

        // Channel-fatal failures poison the job so it never re-runs against
        // broken credentials.
        let error = format!("{}: {reason}", kind.as_str());
        match kind {
            ErrorKind::AuthFailed | ErrorKind::CryptoCorrupted => {
                Ok(JobDisposition::Dead { error })
            }
            _ => Ok(JobDisposition::Complete),
        }
    }

    fn append_failure_attempt(
        &self,
        tenant: &TenantId,
        campaign: &Campaign,
        step: Option<&CampaignStep>,
        recipient: &Recipient,
        kind: ErrorKind,
        reason: &str,
    ) -> Result<()> {
        let channel_kind = step.map(|s| s.channel_kind).unwrap_or(ChannelKind::EmailSmtp);
        self.store.append_attempt(
            tenant,
            channel_kind,
            Direction::Outbound,
            AttemptStatus::Failed,
            AttemptDraft {
                campaign_id: Some(campaign.id.clone()),
                campaign_step_id: step.map(|s| s.id.clone()),
                recipient_id: Some(recipient.id.clone()),
                lead_id: recipient.lead_id.clone(),
                contact_id: recipient.contact_id.clone(),
                body: String::new(),
                metadata: Some(json!({
                    "error": { "kind": kind.as_str(), "reason": reason }
                })),
                ..Default::default()
            },
        )?;
        Ok(())
    }

    /// COMPLETED once no recipient is PENDING or IN_PROGRESS.
    fn maybe_complete(&self, tenant: &TenantId, campaign_id: &str) -> Result<()> {
        if self.store.live_recipient_count(tenant, campaign_id)? == 0 {
            self.store.mark_campaign_completed(tenant, campaign_id)?;
        }
        Ok(())
    }

    fn guard_draft(&self, tenant: &TenantId, campaign_id: &str, action: &'static str) -> Result<()> {
        let campaign = self.store.get_campaign(tenant, campaign_id)?;
        if campaign.status != CampaignStatus::Draft {
            return Err(CampaignError::InvalidState {
                id: campaign_id.to_string(),
                action,
                status: campaign.status.as_str().to_string(),
            });
        }
        Ok(())
    }

    fn load_target(
        &self,
        tenant: &TenantId,
        recipient: &Recipient,
    ) -> Result<(Option<Contact>, Option<Lead>, Option<Prospect>)> {
        if let Some(contact_id) = &recipient.contact_id {
            let contact = self.contacts.get_contact(tenant, contact_id)?;
            let lead = self.contacts.get_lead(tenant, &contact.lead_id).ok();
            return Ok((Some(contact), lead, None));
        }
        if let Some(prospect_id) = &recipient.prospect_id {
            let prospect = self.contacts.get_prospect(tenant, prospect_id)?;
            return Ok((None, None, Some(prospect)));
        }
        Ok((None, None, None))
    }

    /// Enqueue one CAMPAIGN_STEP job for a recipient. Public as the boundary
    /// contract for the rest of the backend; the engine itself uses it to
    /// chain steps.
    pub fn enqueue_campaign_step(
        &self,
        tenant: &TenantId,
        campaign_id: &str,
        recipient_id: &str,
        run_after: DateTime<Utc>,
    ) -> Result<String> {
        self.enqueue_step(tenant, campaign_id, recipient_id, run_after, 5)
    }

    fn enqueue_step(
        &self,
        tenant: &TenantId,
        campaign_id: &str,
        recipient_id: &str,
        run_after: DateTime<Utc>,
        priority: i64,
    ) -> Result<String> {
        let payload = serde_json::to_value(StepPayload {
            tenant_id: tenant.to_string(),
            campaign_id: campaign_id.to_string(),
            recipient_id: recipient_id.to_string(),
        })?;
        Ok(self.queue.enqueue(
            JobKind::CampaignStep,
            payload,
            EnqueueOptions {
                tenant_id: Some(tenant.clone()),
                priority,
                run_after: Some(run_after),
                max_attempts: 3,
            },
        )?)
    }
}

/// The sendable address for a target on a given channel kind, if any.
fn recipient_address(
    kind: ChannelKind,
    contact: Option<&Contact>,
    prospect: Option<&Prospect>,
) -> Option<String> {
    match kind {
        ChannelKind::EmailSmtp | ChannelKind::EmailApi => {
            contact.and_then(|c| c.email.clone()).filter(|e| !e.is_empty())
        }
        ChannelKind::Sms | ChannelKind::Voice | ChannelKind::WhatsappBusiness => contact
            .and_then(|c| c.phone.clone())
            .or_else(|| prospect.and_then(|p| p.phone.clone()))
            .filter(|p| !p.is_empty()),
        ChannelKind::WhatsappWeb => prospect
            .map(|p| p.peer_address.clone())
            .or_else(|| contact.and_then(|c| c.phone.clone()))
            .filter(|p| !p.is_empty()),
        ChannelKind::Telegram => prospect
            .map(|p| p.peer_address.clone())
            .filter(|p| !p.is_empty()),
    }
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    s.parse::<DateTime<Utc>>().ok()
}

/// Queue handler driving [`CampaignEngine::process_step`].
pub struct StepJobHandler {
    engine: Arc<CampaignEngine>,
}

impl StepJobHandler {
    pub fn new(engine: Arc<CampaignEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl JobHandler for StepJobHandler {
    fn kind(&self) -> JobKind {
        JobKind::CampaignStep
    }

    async fn run(&self, job: &Job) -> JobDisposition {
        self.engine.process_step(job).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outflow_vault::CredentialVault;
    use rusqlite::Connection;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration as StdDuration;

    /// Scripted dispatcher: pops the next outcome, defaulting to Sent.
    struct FakeDispatcher {
        script: Mutex<VecDeque<Outcome>>,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl FakeDispatcher {
        fn always_sent() -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(VecDeque::new()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn scripted(outcomes: Vec<Outcome>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(outcomes.into()),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl OutboundDispatcher for FakeDispatcher {
        async fn dispatch(
            &self,
            _tenant: &TenantId,
            _channel_config_id: &str,
            to: &str,
            message: &outflow_core::RenderedMessage,
        ) -> Outcome {
            self.calls
                .lock()
                .unwrap()
                .push((to.to_string(), message.body.clone()));
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Outcome::Sent {
                    external_id: format!("ext-{}", uuid::Uuid::new_v4()),
                })
        }
    }

    struct Harness {
        engine: Arc<CampaignEngine>,
        store: Arc<CampaignStore>,
        contacts: Arc<ContactStore>,
        queue: Arc<JobQueue>,
        dispatcher: Arc<FakeDispatcher>,
        tenant: TenantId,
    }

    fn harness(dispatcher: Arc<FakeDispatcher>) -> Harness {
        let store = Arc::new(CampaignStore::new(Connection::open_in_memory().unwrap()).unwrap());
        let contacts =
            Arc::new(ContactStore::new(Connection::open_in_memory().unwrap()).unwrap());
        let channels = Arc::new(
            ChannelStore::new(
                Connection::open_in_memory().unwrap(),
                Arc::new(CredentialVault::new(&[5u8; 32])),
            )
            .unwrap(),
        );
        let queue = Arc::new(JobQueue::new(Connection::open_in_memory().unwrap()).unwrap());
        let tenant = TenantId(contacts.create_tenant("acme", 0).unwrap().id);
        let engine = Arc::new(CampaignEngine::new(
            Arc::clone(&store),
            Arc::clone(&contacts),
            channels,
            Arc::clone(&queue),
            dispatcher.clone() as Arc<dyn OutboundDispatcher>,
        ));
        Harness {
            engine,
            store,
            contacts,
            queue,
            dispatcher,
            tenant,
        }
    }

    /// One-step email campaign over `names`, template "Hello {{contact.name}}".
    fn seed_email_campaign(h: &Harness, names: &[&str], interval: i64) -> String {
        let template = h
            .store
            .create_template(
                &h.tenant,
                ChannelKind::EmailSmtp,
                "hello",
                Some("Hi"),
                "Hello {{contact.name}}",
                false,
                &[],
            )
            .unwrap();
        let campaign = h
            .store
            .create_campaign(&h.tenant, "welcome", CampaignType::Immediate, None, interval)
            .unwrap();
        h.store
            .add_step(
                &campaign.id,
                1,
                ChannelKind::EmailSmtp,
                "cfg-email",
                &template.id,
                (0, 0, 0),
                None,
            )
            .unwrap();

        let lead = h
            .contacts
            .create_lead(&h.tenant, "Acme", None, None, None)
            .unwrap();
        let mut contact_ids = Vec::new();
        for name in names {
            let c = h
                .contacts
                .create_contact(
                    &h.tenant,
                    &lead.id,
                    name,
                    Some(&format!("{}@acme.example", name.to_lowercase())),
                    None,
                    None,
                    false,
                )
                .unwrap();
            contact_ids.push(c.id);
        }
        h.engine
            .add_recipients_by_contact_ids(&h.tenant, &campaign.id, &contact_ids)
            .unwrap();
        campaign.id
    }

    fn lease_one(h: &Harness) -> Option<Job> {
        h.queue
            .lease("test", &[JobKind::CampaignStep], 1, StdDuration::from_secs(60))
            .unwrap()
            .into_iter()
            .next()
    }

    fn apply(h: &Harness, job: &Job, disposition: JobDisposition) {
        match disposition {
            JobDisposition::Complete => h.queue.complete(&job.id).unwrap(),
            JobDisposition::Reschedule { run_after } => {
                h.queue.reschedule(&job.id, run_after).unwrap()
            }
            JobDisposition::Retry { error } => {
                h.queue.fail(&job.id, &error, true, None).map(|_| ()).unwrap()
            }
            JobDisposition::RetryAfter { error, delay } => h
                .queue
                .fail(&job.id, &error, true, Some(delay))
                .map(|_| ())
                .unwrap(),
            JobDisposition::Fail { error } => {
                h.queue.fail(&job.id, &error, false, None).map(|_| ()).unwrap()
            }
            JobDisposition::Dead { error } => h.queue.fail_dead(&job.id, &error).unwrap(),
        }
    }

    #[test]
    fn start_requires_steps_and_recipients() {
        let h = harness(FakeDispatcher::always_sent());
        let campaign = h
            .store
            .create_campaign(&h.tenant, "empty", CampaignType::Immediate, None, 0)
            .unwrap();
        assert!(matches!(
            h.engine.start_campaign(&h.tenant, &campaign.id),
            Err(CampaignError::NoSteps)
        ));

        let template = h
            .store
            .create_template(&h.tenant, ChannelKind::EmailSmtp, "t", None, "b", false, &[])
            .unwrap();
        h.store
            .add_step(&campaign.id, 1, ChannelKind::EmailSmtp, "cfg", &template.id, (0, 0, 0), None)
            .unwrap();
        assert!(matches!(
            h.engine.start_campaign(&h.tenant, &campaign.id),
            Err(CampaignError::NoRecipients)
        ));
    }

    #[test]
    fn start_staggers_first_step_jobs() {
        let h = harness(FakeDispatcher::always_sent());
        let campaign_id = seed_email_campaign(&h, &["A", "B", "C"], 10);
        let before = Utc::now();
        h.engine.start_campaign(&h.tenant, &campaign_id).unwrap();

        let mut jobs = h.queue.find_live(JobKind::CampaignStep).unwrap();
        assert_eq!(jobs.len(), 3);
        jobs.sort_by(|a, b| a.run_after.cmp(&b.run_after));
        let times: Vec<DateTime<Utc>> = jobs
            .iter()
            .map(|j| j.run_after.parse::<DateTime<Utc>>().unwrap())
            .collect();
        // Arithmetic progression base, base+10, base+20.
        assert!((times[0] - before).num_seconds() < 2);
        assert_eq!((times[1] - times[0]).num_seconds(), 10);
        assert_eq!((times[2] - times[1]).num_seconds(), 10);

        let campaign = h.store.get_campaign(&h.tenant, &campaign_id).unwrap();
        assert_eq!(campaign.status, CampaignStatus::Active);
        assert!(campaign.started_at.is_some());
    }

    #[tokio::test]
    async fn immediate_single_step_campaign_runs_to_completion() {
        let h = harness(FakeDispatcher::always_sent());
        let campaign_id = seed_email_campaign(&h, &["A", "B", "C"], 0);
        h.engine.start_campaign(&h.tenant, &campaign_id).unwrap();

        loop {
            let Some(job) = lease_one(&h) else { break };
            let d = h.engine.process_step(&job).await;
            apply(&h, &job, d);
        }

        // One SENT attempt per recipient with the rendered body.
        let bodies: Vec<String> = h
            .dispatcher
            .calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, b)| b.clone())
            .collect();
        assert_eq!(bodies.len(), 3);
        assert!(bodies.contains(&"Hello A".to_string()));
        assert!(bodies.contains(&"Hello B".to_string()));
        assert!(bodies.contains(&"Hello C".to_string()));

        let counts = h.store.recipient_counts(&h.tenant, &campaign_id).unwrap();
        assert_eq!(counts.completed, 3);
        let campaign = h.store.get_campaign(&h.tenant, &campaign_id).unwrap();
        assert_eq!(campaign.status, CampaignStatus::Completed);
        assert!(campaign.completed_at.is_some());
    }

    #[tokio::test]
    async fn two_step_sequence_applies_the_delay() {
        let h = harness(FakeDispatcher::always_sent());
        let template2 = h
            .store
            .create_template(&h.tenant, ChannelKind::EmailSmtp, "ping", None, "Ping", false, &[])
            .unwrap();
        let campaign_id = seed_email_campaign(&h, &["A"], 0);
        h.store
            .add_step(
                &campaign_id,
                2,
                ChannelKind::EmailSmtp,
                "cfg-email",
                &template2.id,
                (0, 24, 0),
                None,
            )
            .unwrap();
        h.engine.start_campaign(&h.tenant, &campaign_id).unwrap();

        // Step 1 fires now.
        let job = lease_one(&h).unwrap();
        let before = Utc::now();
        let d = h.engine.process_step(&job).await;
        apply(&h, &job, d.clone());
        assert_eq!(d, JobDisposition::Complete);

        let recipients = h.store.live_recipients(&h.tenant, &campaign_id).unwrap();
        assert_eq!(recipients.len(), 1);
        assert_eq!(recipients[0].current_step, 2);

        // Step 2's job is scheduled ~24h out.
        let chained = h.queue.find_live(JobKind::CampaignStep).unwrap();
        assert_eq!(chained.len(), 1);
        let run_after: DateTime<Utc> = chained[0].run_after.parse().unwrap();
        let delta_hours = (run_after - before).num_minutes() as f64 / 60.0;
        assert!((delta_hours - 24.0).abs() < 0.1, "delta was {delta_hours}h");

        // Processed early, the chained job defers to the recipient's clock.
        let job2 = h.queue.get(&chained[0].id).unwrap();
        match h.engine.process_step(&job2).await {
            JobDisposition::Reschedule { run_after } => {
                let hours = (run_after - Utc::now()).num_minutes() as f64 / 60.0;
                assert!((hours - 24.0).abs() < 0.1, "early run deferred {hours}h");
            }
            other => panic!("expected Reschedule before the delay elapses, got {other:?}"),
        }

        // Simulate the delay elapsing.
        let r = &recipients[0];
        h.store
            .set_next_action(&h.tenant, &r.id, Some(Utc::now() - Duration::seconds(1)))
            .unwrap();
        let d2 = h.engine.process_step(&job2).await;
        match d2 {
            JobDisposition::Complete => {}
            other => panic!("expected Complete after delay elapsed, got {other:?}"),
        }

        let calls = h.dispatcher.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1, "Hello A");
        assert_eq!(calls[1].1, "Ping");
        drop(calls);

        let r = h.store.get_recipient(&h.tenant, &r.id).unwrap();
        assert_eq!(r.current_step, 3);
        assert_eq!(r.status, RecipientStatus::Completed);
        assert_eq!(
            h.store.sent_count_for_recipient(&h.tenant, &r.id).unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn transient_failure_retries_then_succeeds() {
        let h = harness(FakeDispatcher::scripted(vec![Outcome::TransientFailure {
            kind: ErrorKind::TransientNetwork,
            reason: "smtp timeout".into(),
        }]));
        let campaign_id = seed_email_campaign(&h, &["A"], 0);
        h.engine.start_campaign(&h.tenant, &campaign_id).unwrap();

        // First attempt fails transiently.
        let job = lease_one(&h).unwrap();
        let d = h.engine.process_step(&job).await;
        assert!(matches!(d, JobDisposition::Retry { .. }));
        apply(&h, &job, d);

        let stored = h.queue.get(&job.id).unwrap();
        assert_eq!(stored.status, outflow_queue::JobStatus::Pending);
        // Queue backoff is 60 s on the first failure.
        let run_after: DateTime<Utc> = stored.run_after.parse().unwrap();
        assert!((run_after - Utc::now()).num_seconds() > 50);

        // Retry succeeds (script exhausted → Sent).
        let retry = h.queue.get(&job.id).unwrap();
        let d2 = h.engine.process_step(&retry).await;
        assert_eq!(d2, JobDisposition::Complete);

        let recipients = h
            .store
            .recipient_counts(&h.tenant, &campaign_id)
            .unwrap();
        assert_eq!(recipients.completed, 1);

        // Two attempts: one FAILED, one SENT.
        let recipient_rows = h.store.live_recipients(&h.tenant, &campaign_id).unwrap();
        assert!(recipient_rows.is_empty());
        let all = h
            .dispatcher
            .calls
            .lock()
            .unwrap()
            .len();
        assert_eq!(all, 2);
    }

    #[tokio::test]
    async fn replied_recipient_short_circuits_remaining_steps() {
        let h = harness(FakeDispatcher::always_sent());
        let campaign_id = seed_email_campaign(&h, &["A"], 0);
        h.engine.start_campaign(&h.tenant, &campaign_id).unwrap();

        let recipients = h.store.live_recipients(&h.tenant, &campaign_id).unwrap();
        h.store
            .set_recipient_status(&h.tenant, &recipients[0].id, RecipientStatus::Replied)
            .unwrap();

        let job = lease_one(&h).unwrap();
        let d = h.engine.process_step(&job).await;
        assert_eq!(d, JobDisposition::Complete);
        assert!(h.dispatcher.calls.lock().unwrap().is_empty(), "no send after reply");
        assert_eq!(
            h.store
                .sent_count_for_recipient(&h.tenant, &recipients[0].id)
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn paused_campaign_soft_retries() {
        let h = harness(FakeDispatcher::always_sent());
        let campaign_id = seed_email_campaign(&h, &["A"], 0);
        h.engine.start_campaign(&h.tenant, &campaign_id).unwrap();
        h.engine.pause_campaign(&h.tenant, &campaign_id).unwrap();
        // Pause is idempotent.
        h.engine.pause_campaign(&h.tenant, &campaign_id).unwrap();

        let job = lease_one(&h).unwrap();
        let d = h.engine.process_step(&job).await;
        match d {
            JobDisposition::Reschedule { run_after } => {
                let delta = (run_after - Utc::now()).num_seconds();
                assert!((25..=35).contains(&delta), "soft pause was {delta}s");
            }
            other => panic!("expected Reschedule, got {other:?}"),
        }
        assert!(h.dispatcher.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn pause_then_resume_produces_the_same_outcome() {
        let h = harness(FakeDispatcher::always_sent());
        let campaign_id = seed_email_campaign(&h, &["A"], 0);
        h.engine.start_campaign(&h.tenant, &campaign_id).unwrap();
        h.engine.pause_campaign(&h.tenant, &campaign_id).unwrap();

        // Resume keeps the existing job (no duplicates) and the existing
        // next_action_at.
        h.engine.start_campaign(&h.tenant, &campaign_id).unwrap();
        assert_eq!(h.queue.find_live(JobKind::CampaignStep).unwrap().len(), 1);

        let job = lease_one(&h).unwrap();
        let d = h.engine.process_step(&job).await;
        apply(&h, &job, d);

        let counts = h.store.recipient_counts(&h.tenant, &campaign_id).unwrap();
        assert_eq!(counts.completed, 1);
        assert_eq!(
            h.store.get_campaign(&h.tenant, &campaign_id).unwrap().status,
            CampaignStatus::Completed
        );
    }

    #[tokio::test]
    async fn permanent_failure_fails_the_recipient() {
        let h = harness(FakeDispatcher::scripted(vec![Outcome::PermanentFailure {
            kind: ErrorKind::RecipientInvalid,
            reason: "bounced".into(),
        }]));
        let campaign_id = seed_email_campaign(&h, &["A"], 0);
        h.engine.start_campaign(&h.tenant, &campaign_id).unwrap();

        let job = lease_one(&h).unwrap();
        let d = h.engine.process_step(&job).await;
        assert_eq!(d, JobDisposition::Complete);

        let counts = h.store.recipient_counts(&h.tenant, &campaign_id).unwrap();
        assert_eq!(counts.failed, 1);
        let campaign = h.store.get_campaign(&h.tenant, &campaign_id).unwrap();
        assert_eq!(campaign.status, CampaignStatus::Completed);
    }

    #[tokio::test]
    async fn auth_failure_kills_the_job() {
        let h = harness(FakeDispatcher::scripted(vec![Outcome::PermanentFailure {
            kind: ErrorKind::AuthFailed,
            reason: "bad credentials".into(),
        }]));
        let campaign_id = seed_email_campaign(&h, &["A"], 0);
        h.engine.start_campaign(&h.tenant, &campaign_id).unwrap();

        let job = lease_one(&h).unwrap();
        let d = h.engine.process_step(&job).await;
        assert!(matches!(d, JobDisposition::Dead { .. }));
    }

    #[tokio::test]
    async fn deleted_campaign_completes_leftover_jobs() {
        let h = harness(FakeDispatcher::always_sent());
        let campaign_id = seed_email_campaign(&h, &["A"], 0);
        h.engine.start_campaign(&h.tenant, &campaign_id).unwrap();

        // Simulate deletion by a foreign subsystem.
        {
            let job = lease_one(&h).unwrap();
            let fake_payload: StepPayload =
                serde_json::from_value(job.payload.clone()).unwrap();
            // Point the job at a campaign id that no longer exists.
            let mut missing = job.clone();
            missing.payload = serde_json::to_value(StepPayload {
                campaign_id: "gone".to_string(),
                ..fake_payload
            })
            .unwrap();
            let d = h.engine.process_step(&missing).await;
            assert_eq!(d, JobDisposition::Complete);
        }
        assert!(h.dispatcher.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn filter_enrolment_snapshots_the_filter() {
        let h = harness(FakeDispatcher::always_sent());
        let campaign = h
            .store
            .create_campaign(&h.tenant, "filtered", CampaignType::Immediate, None, 0)
            .unwrap();

        let saas = h
            .contacts
            .create_lead(&h.tenant, "Nimbus", None, Some("saas"), None)
            .unwrap();
        h.contacts
            .create_contact(&h.tenant, &saas.id, "Ann", Some("a@n.io"), None, None, true)
            .unwrap();
        let mining = h
            .contacts
            .create_lead(&h.tenant, "Granite", None, Some("mining"), None)
            .unwrap();
        h.contacts
            .create_contact(&h.tenant, &mining.id, "Bob", Some("b@g.io"), None, None, true)
            .unwrap();

        let added = h
            .engine
            .add_recipients_by_filter(
                &h.tenant,
                &campaign.id,
                &LeadFilter {
                    industry: Some("saas".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(added, 1);

        // A lead created after the snapshot is NOT picked up.
        let late = h
            .contacts
            .create_lead(&h.tenant, "LateCloud", None, Some("saas"), None)
            .unwrap();
        h.contacts
            .create_contact(&h.tenant, &late.id, "Cee", Some("c@l.io"), None, None, true)
            .unwrap();
        assert_eq!(h.store.recipient_count(&h.tenant, &campaign.id).unwrap(), 1);

        let stored = h.store.get_campaign(&h.tenant, &campaign.id).unwrap();
        assert!(stored.target_filter.is_some());
    }

    #[test]
    fn enrolment_is_rejected_outside_draft() {
        let h = harness(FakeDispatcher::always_sent());
        let campaign_id = seed_email_campaign(&h, &["A"], 0);
        h.engine.start_campaign(&h.tenant, &campaign_id).unwrap();
        assert!(matches!(
            h.engine
                .add_recipients_by_contact_ids(&h.tenant, &campaign_id, &["c-x".into()]),
            Err(CampaignError::InvalidState { .. })
        ));
    }
}
