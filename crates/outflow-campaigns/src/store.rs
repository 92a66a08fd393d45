use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{debug, info};
use uuid::Uuid;

use outflow_core::{ChannelKind, Direction, TenantId};

use crate::db::init_db;
use crate::error::{CampaignError, Result};
use crate::types::*;

/// Bulk recipient inserts are chunked to keep write transactions short.
const RECIPIENT_CHUNK: usize = 1000;

/// Store for campaigns, steps, recipients, attempts, and templates.
pub struct CampaignStore {
    db: Mutex<Connection>,
}

/// Fields of a new outbound/inbound attempt row. Append-only once written.
#[derive(Debug, Clone, Default)]
pub struct AttemptDraft {
    pub campaign_id: Option<String>,
    pub campaign_step_id: Option<String>,
    pub recipient_id: Option<String>,
    pub lead_id: Option<String>,
    pub contact_id: Option<String>,
    pub subject: Option<String>,
    pub body: String,
    pub external_id: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub replied_at: Option<DateTime<Utc>>,
    pub metadata: Option<serde_json::Value>,
}

impl CampaignStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    // --- campaigns ---------------------------------------------------------

    pub fn create_campaign(
        &self,
        tenant: &TenantId,
        name: &str,
        campaign_type: CampaignType,
        scheduled_at: Option<DateTime<Utc>>,
        message_interval_seconds: i64,
    ) -> Result<Campaign> {
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO campaigns
             (id, tenant_id, name, campaign_type, status, scheduled_at,
              message_interval_seconds, created_at)
             VALUES (?1, ?2, ?3, ?4, 'DRAFT', ?5, ?6, ?7)",
            rusqlite::params![
                id,
                tenant.as_str(),
                name,
                campaign_type.as_str(),
                scheduled_at.map(|t| t.to_rfc3339()),
                message_interval_seconds,
                now
            ],
        )?;
        drop(db);
        info!(campaign_id = %id, %name, "campaign created");
        self.get_campaign(tenant, &id)
    }

    pub fn get_campaign(&self, tenant: &TenantId, id: &str) -> Result<Campaign> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT id, tenant_id, name, campaign_type, status, scheduled_at, started_at,
                    completed_at, message_interval_seconds, target_filter, created_at
             FROM campaigns WHERE tenant_id = ?1 AND id = ?2",
            rusqlite::params![tenant.as_str(), id],
            row_to_campaign,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => CampaignError::CampaignNotFound {
                id: id.to_string(),
            },
            other => CampaignError::Database(other),
        })
    }

    pub fn set_campaign_status(
        &self,
        tenant: &TenantId,
        id: &str,
        status: CampaignStatus,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE campaigns SET status = ?1 WHERE tenant_id = ?2 AND id = ?3",
            rusqlite::params![status.as_str(), tenant.as_str(), id],
        )?;
        if n == 0 {
            return Err(CampaignError::CampaignNotFound { id: id.to_string() });
        }
        Ok(())
    }

    pub fn mark_campaign_started(&self, tenant: &TenantId, id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE campaigns
             SET status = 'ACTIVE', started_at = COALESCE(started_at, ?1)
             WHERE tenant_id = ?2 AND id = ?3",
            rusqlite::params![now, tenant.as_str(), id],
        )?;
        Ok(())
    }

    pub fn mark_campaign_completed(&self, tenant: &TenantId, id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE campaigns SET status = 'COMPLETED', completed_at = ?1
             WHERE tenant_id = ?2 AND id = ?3 AND status = 'ACTIVE'",
            rusqlite::params![now, tenant.as_str(), id],
        )?;
        info!(campaign_id = %id, "campaign completed");
        Ok(())
    }

    pub fn set_target_filter(
        &self,
        tenant: &TenantId,
        id: &str,
        filter: &serde_json::Value,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE campaigns SET target_filter = ?1 WHERE tenant_id = ?2 AND id = ?3",
            rusqlite::params![filter.to_string(), tenant.as_str(), id],
        )?;
        Ok(())
    }

    /// Aggregate recipient counters for the admin surface.
    pub fn recipient_counts(&self, tenant: &TenantId, campaign_id: &str) -> Result<RecipientCounts> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT status, COUNT(*) FROM recipients
             WHERE tenant_id = ?1 AND campaign_id = ?2
             GROUP BY status",
        )?;
        let rows = stmt.query_map(rusqlite::params![tenant.as_str(), campaign_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?))
        })?;
        let mut counts = RecipientCounts::default();
        for row in rows.filter_map(|r| r.ok()) {
            match row.0.as_str() {
                "PENDING" => counts.pending = row.1,
                "IN_PROGRESS" => counts.in_progress = row.1,
                "COMPLETED" => counts.completed = row.1,
                "FAILED" => counts.failed = row.1,
                "UNSUBSCRIBED" => counts.unsubscribed = row.1,
                "REPLIED" => counts.replied = row.1,
                _ => {}
            }
        }
        Ok(counts)
    }

    // --- steps -------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn add_step(
        &self,
        campaign_id: &str,
        step_order: u32,
        channel_kind: ChannelKind,
        channel_config_id: &str,
        template_id: &str,
        delays: (i64, i64, i64),
        send_time: Option<&str>,
    ) -> Result<CampaignStep> {
        if let Some(window) = send_time {
            crate::schedule::SendWindow::parse(window)?;
        }
        let id = Uuid::now_v7().to_string();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO campaign_steps
             (id, campaign_id, step_order, channel_kind, channel_config_id, template_id,
              delay_days, delay_hours, delay_minutes, send_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                id,
                campaign_id,
                step_order,
                channel_kind.as_str(),
                channel_config_id,
                template_id,
                delays.0,
                delays.1,
                delays.2,
                send_time
            ],
        )?;
        Ok(CampaignStep {
            id,
            campaign_id: campaign_id.to_string(),
            step_order,
            channel_kind,
            channel_config_id: channel_config_id.to_string(),
            template_id: template_id.to_string(),
            delay_days: delays.0,
            delay_hours: delays.1,
            delay_minutes: delays.2,
            send_time: send_time.map(String::from),
        })
    }

    pub fn steps(&self, campaign_id: &str) -> Result<Vec<CampaignStep>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, campaign_id, step_order, channel_kind, channel_config_id, template_id,
                    delay_days, delay_hours, delay_minutes, send_time
             FROM campaign_steps WHERE campaign_id = ?1
             ORDER BY step_order",
        )?;
        let rows = stmt.query_map(rusqlite::params![campaign_id], row_to_step)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn step_at(&self, campaign_id: &str, step_order: u32) -> Result<Option<CampaignStep>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT id, campaign_id, step_order, channel_kind, channel_config_id, template_id,
                    delay_days, delay_hours, delay_minutes, send_time
             FROM campaign_steps WHERE campaign_id = ?1 AND step_order = ?2",
            rusqlite::params![campaign_id, step_order],
            row_to_step,
        ) {
            Ok(step) => Ok(Some(step)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(CampaignError::Database(e)),
        }
    }

    pub fn step_count(&self, campaign_id: &str) -> Result<u32> {
        let db = self.db.lock().unwrap();
        let n: u32 = db.query_row(
            "SELECT COUNT(*) FROM campaign_steps WHERE campaign_id = ?1",
            rusqlite::params![campaign_id],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    // --- templates ---------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn create_template(
        &self,
        tenant: &TenantId,
        channel_kind: ChannelKind,
        name: &str,
        subject: Option<&str>,
        body: &str,
        use_ai: bool,
        variations: &[TemplateVariation],
    ) -> Result<Template> {
        if use_ai && variations.is_empty() {
            return Err(CampaignError::TemplateInvalid(
                "AI templates require at least one variation".to_string(),
            ));
        }
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        let variations_json = serde_json::to_string(variations)?;
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO templates
             (id, tenant_id, channel_kind, name, subject, body, use_ai, variations, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                id,
                tenant.as_str(),
                channel_kind.as_str(),
                name,
                subject,
                body,
                use_ai as i64,
                variations_json,
                now
            ],
        )?;
        Ok(Template {
            id,
            tenant_id: tenant.to_string(),
            channel_kind,
            name: name.to_string(),
            subject: subject.map(String::from),
            body: body.to_string(),
            use_ai,
            variations: variations.to_vec(),
            created_at: now,
        })
    }

    pub fn get_template(&self, tenant: &TenantId, id: &str) -> Result<Template> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT id, tenant_id, channel_kind, name, subject, body, use_ai, variations,
                    created_at
             FROM templates WHERE tenant_id = ?1 AND id = ?2",
            rusqlite::params![tenant.as_str(), id],
            row_to_template,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => CampaignError::TemplateNotFound {
                id: id.to_string(),
            },
            other => CampaignError::Database(other),
        })
    }

    // --- recipients --------------------------------------------------------

    /// Bulk enrolment, idempotent w.r.t. duplicates: the partial unique
    /// indexes make re-adding the same contact or prospect a no-op. Returns
    /// the number of rows actually inserted.
    pub fn add_recipients(
        &self,
        tenant: &TenantId,
        campaign_id: &str,
        targets: &[RecipientTarget],
    ) -> Result<usize> {
        let mut inserted = 0;
        let db = self.db.lock().unwrap();
        for chunk in targets.chunks(RECIPIENT_CHUNK) {
            let tx = db.unchecked_transaction()?;
            for target in chunk {
                let id = Uuid::now_v7().to_string();
                let now = Utc::now().to_rfc3339();
                inserted += tx.execute(
                    "INSERT OR IGNORE INTO recipients
                     (id, tenant_id, campaign_id, lead_id, contact_id, prospect_id,
                      status, current_step, metadata, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'PENDING', 1, '{}', ?7)",
                    rusqlite::params![
                        id,
                        tenant.as_str(),
                        campaign_id,
                        target.lead_id,
                        target.contact_id,
                        target.prospect_id,
                        now
                    ],
                )?;
            }
            tx.commit()?;
        }
        debug!(campaign_id, requested = targets.len(), inserted, "recipients added");
        Ok(inserted)
    }

    pub fn get_recipient(&self, tenant: &TenantId, id: &str) -> Result<Recipient> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT id, tenant_id, campaign_id, lead_id, contact_id, prospect_id, status,
                    current_step, next_action_at, metadata, created_at
             FROM recipients WHERE tenant_id = ?1 AND id = ?2",
            rusqlite::params![tenant.as_str(), id],
            row_to_recipient,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => CampaignError::RecipientNotFound {
                id: id.to_string(),
            },
            other => CampaignError::Database(other),
        })
    }

    /// PENDING recipients in creation order (v7 ids are time-sortable, so id
    /// order is creation order).
    pub fn pending_recipients(&self, tenant: &TenantId, campaign_id: &str) -> Result<Vec<Recipient>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, tenant_id, campaign_id, lead_id, contact_id, prospect_id, status,
                    current_step, next_action_at, metadata, created_at
             FROM recipients
             WHERE tenant_id = ?1 AND campaign_id = ?2 AND status = 'PENDING'
             ORDER BY id",
        )?;
        let rows = stmt.query_map(rusqlite::params![tenant.as_str(), campaign_id], row_to_recipient)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Live (PENDING or IN_PROGRESS) recipients of a campaign.
    pub fn live_recipients(&self, tenant: &TenantId, campaign_id: &str) -> Result<Vec<Recipient>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, tenant_id, campaign_id, lead_id, contact_id, prospect_id, status,
                    current_step, next_action_at, metadata, created_at
             FROM recipients
             WHERE tenant_id = ?1 AND campaign_id = ?2
               AND status IN ('PENDING', 'IN_PROGRESS')
             ORDER BY id",
        )?;
        let rows = stmt.query_map(rusqlite::params![tenant.as_str(), campaign_id], row_to_recipient)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn live_recipient_count(&self, tenant: &TenantId, campaign_id: &str) -> Result<u32> {
        let db = self.db.lock().unwrap();
        let n: u32 = db.query_row(
            "SELECT COUNT(*) FROM recipients
             WHERE tenant_id = ?1 AND campaign_id = ?2
               AND status IN ('PENDING', 'IN_PROGRESS')",
            rusqlite::params![tenant.as_str(), campaign_id],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    pub fn recipient_count(&self, tenant: &TenantId, campaign_id: &str) -> Result<u32> {
        let db = self.db.lock().unwrap();
        let n: u32 = db.query_row(
            "SELECT COUNT(*) FROM recipients WHERE tenant_id = ?1 AND campaign_id = ?2",
            rusqlite::params![tenant.as_str(), campaign_id],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    pub fn set_recipient_status(
        &self,
        tenant: &TenantId,
        id: &str,
        status: RecipientStatus,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE recipients SET status = ?1 WHERE tenant_id = ?2 AND id = ?3",
            rusqlite::params![status.as_str(), tenant.as_str(), id],
        )?;
        if n == 0 {
            return Err(CampaignError::RecipientNotFound { id: id.to_string() });
        }
        Ok(())
    }

    pub fn set_next_action(
        &self,
        tenant: &TenantId,
        id: &str,
        at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE recipients SET next_action_at = ?1 WHERE tenant_id = ?2 AND id = ?3",
            rusqlite::params![at.map(|t| t.to_rfc3339()), tenant.as_str(), id],
        )?;
        if n == 0 {
            return Err(CampaignError::RecipientNotFound { id: id.to_string() });
        }
        Ok(())
    }

    /// Advance the step pointer. `current_step` only ever increases; a stale
    /// writer (crashed worker retry) cannot move it backwards.
    pub fn advance_recipient(
        &self,
        tenant: &TenantId,
        id: &str,
        new_step: u32,
        next_action_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE recipients
             SET current_step = ?1, next_action_at = ?2
             WHERE tenant_id = ?3 AND id = ?4 AND current_step < ?1",
            rusqlite::params![
                new_step,
                next_action_at.map(|t| t.to_rfc3339()),
                tenant.as_str(),
                id
            ],
        )?;
        Ok(())
    }

    /// Flip every live recipient targeting `prospect_id` to REPLIED. Returns
    /// how many flipped.
    pub fn mark_replied_by_prospect(&self, tenant: &TenantId, prospect_id: &str) -> Result<usize> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE recipients SET status = 'REPLIED'
             WHERE tenant_id = ?1 AND prospect_id = ?2
               AND status IN ('PENDING', 'IN_PROGRESS')",
            rusqlite::params![tenant.as_str(), prospect_id],
        )?;
        Ok(n)
    }

    /// Same as [`mark_replied_by_prospect`](Self::mark_replied_by_prospect)
    /// for contact-addressed recipients.
    pub fn mark_replied_by_contact(&self, tenant: &TenantId, contact_id: &str) -> Result<usize> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE recipients SET status = 'REPLIED'
             WHERE tenant_id = ?1 AND contact_id = ?2
               AND status IN ('PENDING', 'IN_PROGRESS')",
            rusqlite::params![tenant.as_str(), contact_id],
        )?;
        Ok(n)
    }

    // --- attempts ----------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn append_attempt(
        &self,
        tenant: &TenantId,
        channel_kind: ChannelKind,
        direction: Direction,
        status: AttemptStatus,
        draft: AttemptDraft,
    ) -> Result<ContactAttempt> {
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        let metadata = draft
            .metadata
            .unwrap_or_else(|| serde_json::Value::Object(Default::default()));
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO contact_attempts
             (id, tenant_id, campaign_id, campaign_step_id, recipient_id, lead_id, contact_id,
              channel_kind, direction, status, subject, body, external_id, sent_at, replied_at,
              created_at, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            rusqlite::params![
                id,
                tenant.as_str(),
                draft.campaign_id,
                draft.campaign_step_id,
                draft.recipient_id,
                draft.lead_id,
                draft.contact_id,
                channel_kind.as_str(),
                direction.as_str(),
                status.as_str(),
                draft.subject,
                draft.body,
                draft.external_id,
                draft.sent_at.map(|t| t.to_rfc3339()),
                draft.replied_at.map(|t| t.to_rfc3339()),
                now,
                metadata.to_string(),
            ],
        )?;
        Ok(ContactAttempt {
            id,
            tenant_id: tenant.to_string(),
            campaign_id: draft.campaign_id,
            campaign_step_id: draft.campaign_step_id,
            recipient_id: draft.recipient_id,
            lead_id: draft.lead_id,
            contact_id: draft.contact_id,
            channel_kind,
            direction,
            status,
            subject: draft.subject,
            body: draft.body,
            external_id: draft.external_id,
            sent_at: draft.sent_at.map(|t| t.to_rfc3339()),
            delivered_at: None,
            opened_at: None,
            clicked_at: None,
            replied_at: draft.replied_at.map(|t| t.to_rfc3339()),
            created_at: now,
            metadata,
        })
    }

    /// Attempts for one recipient, oldest first.
    pub fn attempts_for_recipient(&self, tenant: &TenantId, recipient_id: &str) -> Result<Vec<ContactAttempt>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, tenant_id, campaign_id, campaign_step_id, recipient_id, lead_id,
                    contact_id, channel_kind, direction, status, subject, body, external_id,
                    sent_at, delivered_at, opened_at, clicked_at, replied_at, created_at, metadata
             FROM contact_attempts
             WHERE tenant_id = ?1 AND recipient_id = ?2
             ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![tenant.as_str(), recipient_id],
            row_to_attempt,
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Count of OUTBOUND SENT attempts for a recipient (invariant: equals
    /// `current_step - 1` once the recipient is COMPLETED).
    pub fn sent_count_for_recipient(&self, tenant: &TenantId, recipient_id: &str) -> Result<u32> {
        let db = self.db.lock().unwrap();
        let n: u32 = db.query_row(
            "SELECT COUNT(*) FROM contact_attempts
             WHERE tenant_id = ?1 AND recipient_id = ?2
               AND direction = 'OUTBOUND' AND status = 'SENT'",
            rusqlite::params![tenant.as_str(), recipient_id],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    /// The most recent unanswered OUTBOUND attempt toward a peer — the
    /// attribution target for an inbound reply. The prospect path joins
    /// through recipients, since attempts carry the recipient id.
    pub fn latest_unanswered_outbound(
        &self,
        tenant: &TenantId,
        contact_id: Option<&str>,
        prospect_id: Option<&str>,
    ) -> Result<Option<String>> {
        let db = self.db.lock().unwrap();
        let result = db.query_row(
            "SELECT a.id FROM contact_attempts a
             LEFT JOIN recipients r ON r.id = a.recipient_id AND r.tenant_id = a.tenant_id
             WHERE a.tenant_id = ?1
               AND a.direction = 'OUTBOUND'
               AND a.status = 'SENT'
               AND a.replied_at IS NULL
               AND ((?2 IS NOT NULL AND a.contact_id = ?2)
                 OR (?3 IS NOT NULL AND r.prospect_id = ?3))
             ORDER BY a.created_at DESC, a.id DESC
             LIMIT 1",
            rusqlite::params![tenant.as_str(), contact_id, prospect_id],
            |row| row.get::<_, String>(0),
        );
        match result {
            Ok(id) => Ok(Some(id)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(CampaignError::Database(e)),
        }
    }

    pub fn set_attempt_replied(
        &self,
        tenant: &TenantId,
        attempt_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE contact_attempts SET replied_at = ?1
             WHERE tenant_id = ?2 AND id = ?3 AND replied_at IS NULL",
            rusqlite::params![at.to_rfc3339(), tenant.as_str(), attempt_id],
        )?;
        Ok(())
    }
}

// --- row mappers -----------------------------------------------------------

fn row_to_campaign(row: &rusqlite::Row<'_>) -> rusqlite::Result<Campaign> {
    let ctype: String = row.get(3)?;
    let status: String = row.get(4)?;
    let filter: Option<String> = row.get(9)?;
    Ok(Campaign {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        name: row.get(2)?,
        campaign_type: CampaignType::from_str(&ctype).unwrap_or(CampaignType::Immediate),
        status: CampaignStatus::from_str(&status).unwrap_or(CampaignStatus::Draft),
        scheduled_at: row.get(5)?,
        started_at: row.get(6)?,
        completed_at: row.get(7)?,
        message_interval_seconds: row.get(8)?,
        target_filter: filter.and_then(|f| serde_json::from_str(&f).ok()),
        created_at: row.get(10)?,
    })
}

fn row_to_step(row: &rusqlite::Row<'_>) -> rusqlite::Result<CampaignStep> {
    let kind: String = row.get(3)?;
    Ok(CampaignStep {
        id: row.get(0)?,
        campaign_id: row.get(1)?,
        step_order: row.get(2)?,
        channel_kind: kind.parse().unwrap_or(ChannelKind::EmailSmtp),
        channel_config_id: row.get(4)?,
        template_id: row.get(5)?,
        delay_days: row.get(6)?,
        delay_hours: row.get(7)?,
        delay_minutes: row.get(8)?,
        send_time: row.get(9)?,
    })
}

fn row_to_recipient(row: &rusqlite::Row<'_>) -> rusqlite::Result<Recipient> {
    let status: String = row.get(6)?;
    let metadata: String = row.get(9)?;
    Ok(Recipient {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        campaign_id: row.get(2)?,
        lead_id: row.get(3)?,
        contact_id: row.get(4)?,
        prospect_id: row.get(5)?,
        status: RecipientStatus::from_str(&status).unwrap_or(RecipientStatus::Pending),
        current_step: row.get(7)?,
        next_action_at: row.get(8)?,
        metadata: serde_json::from_str(&metadata)
            .unwrap_or(serde_json::Value::Object(Default::default())),
        created_at: row.get(10)?,
    })
}

fn row_to_template(row: &rusqlite::Row<'_>) -> rusqlite::Result<Template> {
    let kind: String = row.get(2)?;
    let variations: String = row.get(7)?;
    Ok(Template {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        channel_kind: kind.parse().unwrap_or(ChannelKind::EmailSmtp),
        name: row.get(3)?,
        subject: row.get(4)?,
        body: row.get(5)?,
        use_ai: row.get::<_, i64>(6)? != 0,
        variations: serde_json::from_str(&variations).unwrap_or_default(),
        created_at: row.get(8)?,
    })
}

fn row_to_attempt(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContactAttempt> {
    let kind: String = row.get(7)?;
    let direction: String = row.get(8)?;
    let status: String = row.get(9)?;
    let metadata: String = row.get(19)?;
    Ok(ContactAttempt {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        campaign_id: row.get(2)?,
        campaign_step_id: row.get(3)?,
        recipient_id: row.get(4)?,
        lead_id: row.get(5)?,
        contact_id: row.get(6)?,
        channel_kind: kind.parse().unwrap_or(ChannelKind::EmailSmtp),
        direction: Direction::from_str(&direction).unwrap_or(Direction::Outbound),
        status: AttemptStatus::from_str(&status).unwrap_or(AttemptStatus::Queued),
        subject: row.get(10)?,
        body: row.get(11)?,
        external_id: row.get(12)?,
        sent_at: row.get(13)?,
        delivered_at: row.get(14)?,
        opened_at: row.get(15)?,
        clicked_at: row.get(16)?,
        replied_at: row.get(17)?,
        created_at: row.get(18)?,
        metadata: serde_json::from_str(&metadata)
            .unwrap_or(serde_json::Value::Object(Default::default())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (CampaignStore, TenantId) {
        (
            CampaignStore::new(Connection::open_in_memory().unwrap()).unwrap(),
            TenantId::from("t-1"),
        )
    }

    #[test]
    fn adding_the_same_contacts_twice_does_not_duplicate() {
        let (s, t) = store();
        let c = s
            .create_campaign(&t, "outreach", CampaignType::Immediate, None, 0)
            .unwrap();
        let targets = vec![
            RecipientTarget::contact("l-1", "c-1"),
            RecipientTarget::contact("l-1", "c-2"),
        ];
        assert_eq!(s.add_recipients(&t, &c.id, &targets).unwrap(), 2);
        assert_eq!(s.add_recipients(&t, &c.id, &targets).unwrap(), 0);
        assert_eq!(s.recipient_count(&t, &c.id).unwrap(), 2);
    }

    #[test]
    fn current_step_is_monotone() {
        let (s, t) = store();
        let c = s
            .create_campaign(&t, "x", CampaignType::Immediate, None, 0)
            .unwrap();
        s.add_recipients(&t, &c.id, &[RecipientTarget::contact("l-1", "c-1")])
            .unwrap();
        let r = &s.pending_recipients(&t, &c.id).unwrap()[0];

        s.advance_recipient(&t, &r.id, 2, None).unwrap();
        assert_eq!(s.get_recipient(&t, &r.id).unwrap().current_step, 2);

        // A stale retry cannot move the pointer backwards.
        s.advance_recipient(&t, &r.id, 1, None).unwrap();
        assert_eq!(s.get_recipient(&t, &r.id).unwrap().current_step, 2);
    }

    #[test]
    fn duplicate_step_order_is_rejected() {
        let (s, t) = store();
        let c = s
            .create_campaign(&t, "x", CampaignType::Immediate, None, 0)
            .unwrap();
        s.add_step(&c.id, 1, ChannelKind::EmailSmtp, "cfg", "tpl", (0, 0, 0), None)
            .unwrap();
        assert!(s
            .add_step(&c.id, 1, ChannelKind::EmailSmtp, "cfg", "tpl", (0, 0, 0), None)
            .is_err());
    }

    #[test]
    fn ai_template_requires_variations() {
        let (s, t) = store();
        assert!(matches!(
            s.create_template(&t, ChannelKind::EmailSmtp, "x", None, "body", true, &[]),
            Err(CampaignError::TemplateInvalid(_))
        ));
    }

    #[test]
    fn attribution_finds_the_latest_unanswered_outbound() {
        let (s, t) = store();
        let c = s
            .create_campaign(&t, "x", CampaignType::Immediate, None, 0)
            .unwrap();
        s.add_recipients(&t, &c.id, &[RecipientTarget::prospect("p-1")])
            .unwrap();
        let r = &s.pending_recipients(&t, &c.id).unwrap()[0];

        let first = s
            .append_attempt(
                &t,
                ChannelKind::Telegram,
                Direction::Outbound,
                AttemptStatus::Sent,
                AttemptDraft {
                    recipient_id: Some(r.id.clone()),
                    body: "step 1".into(),
                    ..Default::default()
                },
            )
            .unwrap();
        let second = s
            .append_attempt(
                &t,
                ChannelKind::Telegram,
                Direction::Outbound,
                AttemptStatus::Sent,
                AttemptDraft {
                    recipient_id: Some(r.id.clone()),
                    body: "step 2".into(),
                    ..Default::default()
                },
            )
            .unwrap();

        let hit = s
            .latest_unanswered_outbound(&t, None, Some("p-1"))
            .unwrap();
        assert_eq!(hit.as_deref(), Some(second.id.as_str()));

        let replied_at = Utc::now();
        s.set_attempt_replied(&t, &second.id, replied_at).unwrap();
        let hit = s
            .latest_unanswered_outbound(&t, None, Some("p-1"))
            .unwrap();
        assert_eq!(hit.as_deref(), Some(first.id.as_str()));
    }

    #[test]
    fn recipient_counts_aggregate_by_status() {
        let (s, t) = store();
        let c = s
            .create_campaign(&t, "x", CampaignType::Immediate, None, 0)
            .unwrap();
        s.add_recipients(
            &t,
            &c.id,
            &[
                RecipientTarget::contact("l-1", "c-1"),
                RecipientTarget::contact("l-1", "c-2"),
                RecipientTarget::contact("l-1", "c-3"),
            ],
        )
        .unwrap();
        let recipients = s.pending_recipients(&t, &c.id).unwrap();
        s.set_recipient_status(&t, &recipients[0].id, RecipientStatus::Completed)
            .unwrap();
        s.set_recipient_status(&t, &recipients[1].id, RecipientStatus::Failed)
            .unwrap();

        let counts = s.recipient_counts(&t, &c.id).unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.failed, 1);
    }
}
