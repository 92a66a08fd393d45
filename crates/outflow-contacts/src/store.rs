use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{debug, info};
use uuid::Uuid;

use outflow_core::{ChannelKind, Direction, TenantId};

use crate::db::init_db;
use crate::error::{ContactError, Result};
use crate::types::*;

/// Thread-safe directory store.
///
/// Wraps a single SQLite connection in a `Mutex`. Every read path binds the
/// caller's tenant id; the only cross-tenant queries live in the boot-time
/// enumeration of the channel store, not here.
pub struct ContactStore {
    db: Mutex<Connection>,
}

impl ContactStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    // --- tenants -----------------------------------------------------------

    pub fn create_tenant(&self, name: &str, utc_offset_minutes: i32) -> Result<Tenant> {
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO tenants (id, name, utc_offset_minutes, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![id, name, utc_offset_minutes, now],
        )?;
        Ok(Tenant {
            id,
            name: name.to_string(),
            utc_offset_minutes,
            created_at: now,
        })
    }

    pub fn get_tenant(&self, tenant: &TenantId) -> Result<Tenant> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT id, name, utc_offset_minutes, created_at
             FROM tenants WHERE id = ?1",
            rusqlite::params![tenant.as_str()],
            |row| {
                Ok(Tenant {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    utc_offset_minutes: row.get(2)?,
                    created_at: row.get(3)?,
                })
            },
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => ContactError::TenantNotFound {
                id: tenant.to_string(),
            },
            other => ContactError::Database(other),
        })
    }

    // --- leads & contacts --------------------------------------------------

    pub fn create_lead(
        &self,
        tenant: &TenantId,
        company_name: &str,
        website: Option<&str>,
        industry: Option<&str>,
        source: Option<&str>,
    ) -> Result<Lead> {
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO leads (id, tenant_id, company_name, website, industry, source, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![id, tenant.as_str(), company_name, website, industry, source, now],
        )?;
        Ok(Lead {
            id,
            tenant_id: tenant.to_string(),
            company_name: company_name.to_string(),
            website: website.map(String::from),
            industry: industry.map(String::from),
            source: source.map(String::from),
            created_at: now,
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_contact(
        &self,
        tenant: &TenantId,
        lead_id: &str,
        name: &str,
        email: Option<&str>,
        phone: Option<&str>,
        position: Option<&str>,
        is_primary: bool,
    ) -> Result<Contact> {
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO contacts
             (id, tenant_id, lead_id, name, email, phone, position, is_primary, unsubscribed, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9)",
            rusqlite::params![
                id,
                tenant.as_str(),
                lead_id,
                name,
                email,
                phone,
                position,
                is_primary as i64,
                now
            ],
        )?;
        Ok(Contact {
            id,
            tenant_id: tenant.to_string(),
            lead_id: lead_id.to_string(),
            name: name.to_string(),
            email: email.map(String::from),
            phone: phone.map(String::from),
            position: position.map(String::from),
            is_primary,
            unsubscribed: false,
            created_at: now,
        })
    }

    pub fn get_lead(&self, tenant: &TenantId, id: &str) -> Result<Lead> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT id, tenant_id, company_name, website, industry, source, created_at
             FROM leads WHERE tenant_id = ?1 AND id = ?2",
            rusqlite::params![tenant.as_str(), id],
            row_to_lead,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                ContactError::LeadNotFound { id: id.to_string() }
            }
            other => ContactError::Database(other),
        })
    }

    pub fn get_contact(&self, tenant: &TenantId, id: &str) -> Result<Contact> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT id, tenant_id, lead_id, name, email, phone, position, is_primary,
                    unsubscribed, created_at
             FROM contacts WHERE tenant_id = ?1 AND id = ?2",
            rusqlite::params![tenant.as_str(), id],
            row_to_contact,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => ContactError::ContactNotFound {
                id: id.to_string(),
            },
            other => ContactError::Database(other),
        })
    }

    /// Contacts belonging to any of `lead_ids`, optionally primary-only, in
    /// creation order.
    pub fn contacts_for_leads(
        &self,
        tenant: &TenantId,
        lead_ids: &[String],
        primary_only: bool,
    ) -> Result<Vec<Contact>> {
        if lead_ids.is_empty() {
            return Ok(Vec::new());
        }
        let db = self.db.lock().unwrap();
        let placeholders = (0..lead_ids.len())
            .map(|i| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(",");
        let mut sql = format!(
            "SELECT id, tenant_id, lead_id, name, email, phone, position, is_primary,
                    unsubscribed, created_at
             FROM contacts
             WHERE tenant_id = ?1 AND lead_id IN ({placeholders})"
        );
        if primary_only {
            sql.push_str(" AND is_primary = 1");
        }
        sql.push_str(" ORDER BY created_at, id");

        let mut stmt = db.prepare(&sql)?;
        let mut params: Vec<&dyn rusqlite::ToSql> = vec![&tenant.0];
        for id in lead_ids {
            params.push(id);
        }
        let rows = stmt.query_map(params.as_slice(), row_to_contact)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Resolve a structured lead filter. Called once, at recipient-addition
    /// time; the snapshot semantics live with the caller.
    pub fn leads_matching(&self, tenant: &TenantId, filter: &LeadFilter) -> Result<Vec<Lead>> {
        let db = self.db.lock().unwrap();
        let mut sql = String::from(
            "SELECT id, tenant_id, company_name, website, industry, source, created_at
             FROM leads WHERE tenant_id = ?1",
        );
        let mut params: Vec<String> = vec![tenant.to_string()];
        if let Some(industry) = &filter.industry {
            params.push(industry.clone());
            sql.push_str(&format!(" AND industry = ?{}", params.len()));
        }
        if let Some(source) = &filter.source {
            params.push(source.clone());
            sql.push_str(&format!(" AND source = ?{}", params.len()));
        }
        if let Some(fragment) = &filter.company_contains {
            params.push(format!("%{}%", fragment.to_lowercase()));
            sql.push_str(&format!(" AND lower(company_name) LIKE ?{}", params.len()));
        }
        sql.push_str(" ORDER BY created_at, id");

        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(params.iter()),
            row_to_lead,
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    // --- prospect groups & prospects ---------------------------------------

    pub fn create_prospect_group(
        &self,
        tenant: &TenantId,
        channel_config_id: &str,
        channel_kind: ChannelKind,
        platform_group_id: &str,
        name: &str,
    ) -> Result<ProspectGroup> {
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO prospect_groups
             (id, tenant_id, channel_config_id, channel_kind, platform_group_id, name, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                id,
                tenant.as_str(),
                channel_config_id,
                channel_kind.as_str(),
                platform_group_id,
                name,
                now
            ],
        )?;
        Ok(ProspectGroup {
            id,
            tenant_id: tenant.to_string(),
            channel_config_id: channel_config_id.to_string(),
            channel_kind,
            platform_group_id: platform_group_id.to_string(),
            name: name.to_string(),
            created_at: now,
        })
    }

    /// Insert a prospect, ignoring duplicates of the same peer within the
    /// same group (re-imports are idempotent). Returns the stored row.
    #[allow(clippy::too_many_arguments)]
    pub fn upsert_prospect(
        &self,
        tenant: &TenantId,
        group_id: &str,
        channel_kind: ChannelKind,
        display_name: &str,
        username: Option<&str>,
        phone: Option<&str>,
        telegram_user_id: Option<i64>,
        peer_address: &str,
    ) -> Result<Prospect> {
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT OR IGNORE INTO prospects
             (id, tenant_id, group_id, channel_kind, display_name, username, phone,
              telegram_user_id, peer_address, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'PENDING', ?10)",
            rusqlite::params![
                id,
                tenant.as_str(),
                group_id,
                channel_kind.as_str(),
                display_name,
                username,
                phone,
                telegram_user_id,
                peer_address,
                now
            ],
        )?;
        // Read back — covers the duplicate case where the insert was ignored.
        db.query_row(
            "SELECT id, tenant_id, group_id, channel_kind, display_name, username, phone,
                    telegram_user_id, peer_address, status, last_messaged_at,
                    last_replied_at, last_watermark_external_id, converted_lead_id, created_at
             FROM prospects
             WHERE tenant_id = ?1 AND group_id = ?2 AND peer_address = ?3",
            rusqlite::params![tenant.as_str(), group_id, peer_address],
            row_to_prospect,
        )
        .map_err(ContactError::Database)
    }

    pub fn get_prospect(&self, tenant: &TenantId, id: &str) -> Result<Prospect> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT id, tenant_id, group_id, channel_kind, display_name, username, phone,
                    telegram_user_id, peer_address, status, last_messaged_at,
                    last_replied_at, last_watermark_external_id, converted_lead_id, created_at
             FROM prospects WHERE tenant_id = ?1 AND id = ?2",
            rusqlite::params![tenant.as_str(), id],
            row_to_prospect,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => ContactError::ProspectNotFound {
                id: id.to_string(),
            },
            other => ContactError::Database(other),
        })
    }

    /// Prospects in any of `group_ids` with one of the given statuses, in
    /// creation order. Used by campaign enrolment (PENDING + MESSAGED).
    pub fn prospects_in_groups(
        &self,
        tenant: &TenantId,
        group_ids: &[String],
        statuses: &[ProspectStatus],
    ) -> Result<Vec<Prospect>> {
        if group_ids.is_empty() || statuses.is_empty() {
            return Ok(Vec::new());
        }
        let db = self.db.lock().unwrap();
        let group_ph = (0..group_ids.len())
            .map(|i| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(",");
        let status_list = statuses
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!(
            "SELECT id, tenant_id, group_id, channel_kind, display_name, username, phone,
                    telegram_user_id, peer_address, status, last_messaged_at,
                    last_replied_at, last_watermark_external_id, converted_lead_id, created_at
             FROM prospects
             WHERE tenant_id = ?1 AND group_id IN ({group_ph}) AND status IN ({status_list})
             ORDER BY created_at, id"
        );
        let mut stmt = db.prepare(&sql)?;
        let mut params: Vec<&dyn rusqlite::ToSql> = vec![&tenant.0];
        for id in group_ids {
            params.push(id);
        }
        let rows = stmt.query_map(params.as_slice(), row_to_prospect)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Peers the reply poller should visit for one channel config: MESSAGED
    /// (or already replied/converted but still watermarked) prospects with a
    /// watermark set, oldest first, capped.
    pub fn prospects_for_polling(
        &self,
        tenant: &TenantId,
        channel_config_id: &str,
        cap: usize,
    ) -> Result<Vec<Prospect>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT p.id, p.tenant_id, p.group_id, p.channel_kind, p.display_name, p.username,
                    p.phone, p.telegram_user_id, p.peer_address, p.status, p.last_messaged_at,
                    p.last_replied_at, p.last_watermark_external_id, p.converted_lead_id,
                    p.created_at
             FROM prospects p
             JOIN prospect_groups g ON g.id = p.group_id AND g.tenant_id = p.tenant_id
             WHERE p.tenant_id = ?1
               AND g.channel_config_id = ?2
               AND p.status IN ('MESSAGED', 'REPLIED', 'CONVERTED')
               AND p.last_watermark_external_id IS NOT NULL
             ORDER BY p.last_messaged_at, p.id
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![tenant.as_str(), channel_config_id, cap as i64],
            row_to_prospect,
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Record an outbound send to a prospect: status PENDING → MESSAGED,
    /// `last_messaged_at` bumped, and the watermark seeded from the outbound
    /// external id so polling starts strictly after our own message.
    pub fn mark_prospect_messaged(
        &self,
        tenant: &TenantId,
        id: &str,
        at: DateTime<Utc>,
        external_id: Option<&str>,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE prospects
             SET status = CASE WHEN status = 'PENDING' THEN 'MESSAGED' ELSE status END,
                 last_messaged_at = ?1,
                 last_watermark_external_id = CASE
                     WHEN ?2 IS NOT NULL AND (last_watermark_external_id IS NULL
                          OR last_watermark_external_id < ?2)
                     THEN ?2 ELSE last_watermark_external_id END
             WHERE tenant_id = ?3 AND id = ?4",
            rusqlite::params![at.to_rfc3339(), external_id, tenant.as_str(), id],
        )?;
        if n == 0 {
            return Err(ContactError::ProspectNotFound { id: id.to_string() });
        }
        Ok(())
    }

    pub fn mark_prospect_replied(
        &self,
        tenant: &TenantId,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE prospects
             SET status = CASE WHEN status = 'CONVERTED' THEN status ELSE 'REPLIED' END,
                 last_replied_at = ?1
             WHERE tenant_id = ?2 AND id = ?3",
            rusqlite::params![at.to_rfc3339(), tenant.as_str(), id],
        )?;
        if n == 0 {
            return Err(ContactError::ProspectNotFound { id: id.to_string() });
        }
        Ok(())
    }

    /// Advance a peer's inbound watermark. Monotonic: a smaller or equal
    /// external id is ignored.
    pub fn advance_prospect_watermark(
        &self,
        tenant: &TenantId,
        id: &str,
        external_id: &str,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE prospects
             SET last_watermark_external_id = ?1
             WHERE tenant_id = ?2 AND id = ?3
               AND (last_watermark_external_id IS NULL OR last_watermark_external_id < ?1)",
            rusqlite::params![external_id, tenant.as_str(), id],
        )?;
        Ok(())
    }

    /// Synthesise a Lead + Contact from a replying prospect and mark it
    /// CONVERTED. Idempotent: a prospect that already has `converted_lead_id`
    /// returns the existing lead without creating anything.
    pub fn convert_prospect(&self, tenant: &TenantId, prospect_id: &str) -> Result<Lead> {
        let prospect = self.get_prospect(tenant, prospect_id)?;
        if let Some(lead_id) = &prospect.converted_lead_id {
            debug!(prospect_id, lead_id, "prospect already converted");
            return self.get_lead(tenant, lead_id);
        }

        // Company name derives from whatever identity the platform gave us.
        let company_name = if !prospect.display_name.is_empty() {
            prospect.display_name.clone()
        } else if let Some(username) = &prospect.username {
            username.clone()
        } else {
            prospect.peer_address.clone()
        };

        let lead = self.create_lead(
            tenant,
            &company_name,
            None,
            None,
            Some("prospect_conversion"),
        )?;
        self.create_contact(
            tenant,
            &lead.id,
            &prospect.display_name,
            None,
            prospect.phone.as_deref(),
            None,
            true,
        )?;

        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE prospects
             SET status = 'CONVERTED', converted_lead_id = ?1
             WHERE tenant_id = ?2 AND id = ?3",
            rusqlite::params![lead.id, tenant.as_str(), prospect_id],
        )?;
        info!(prospect_id, lead_id = %lead.id, "prospect auto-converted to lead");
        Ok(lead)
    }

    // --- conversations -----------------------------------------------------

    /// Return the OPEN conversation for a peer, creating one if none exists.
    /// The partial unique indexes make the create race-safe: on conflict the
    /// insert is ignored and the existing row is read back.
    #[allow(clippy::too_many_arguments)]
    pub fn ensure_open_conversation(
        &self,
        tenant: &TenantId,
        channel_kind: ChannelKind,
        channel_config_id: &str,
        contact_id: Option<&str>,
        prospect_id: Option<&str>,
        lead_id: Option<&str>,
    ) -> Result<Conversation> {
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT OR IGNORE INTO conversations
             (id, tenant_id, channel_kind, channel_config_id, contact_id, prospect_id,
              lead_id, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'OPEN', ?8, ?8)",
            rusqlite::params![
                id,
                tenant.as_str(),
                channel_kind.as_str(),
                channel_config_id,
                contact_id,
                prospect_id,
                lead_id,
                now
            ],
        )?;
        db.query_row(
            "SELECT id, tenant_id, channel_kind, channel_config_id, contact_id, prospect_id,
                    lead_id, status, created_at, updated_at
             FROM conversations
             WHERE tenant_id = ?1 AND channel_kind = ?2 AND status = 'OPEN'
               AND ((?3 IS NOT NULL AND contact_id = ?3)
                 OR (?4 IS NOT NULL AND prospect_id = ?4))",
            rusqlite::params![tenant.as_str(), channel_kind.as_str(), contact_id, prospect_id],
            row_to_conversation,
        )
        .map_err(ContactError::Database)
    }

    /// Append a message and bump the conversation's `updated_at`.
    pub fn append_message(
        &self,
        conversation_id: &str,
        direction: Direction,
        content: &str,
        external_id: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<ConversationMessage> {
        let id = Uuid::now_v7().to_string();
        let at_str = at.to_rfc3339();
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
            rusqlite::params![at_str, conversation_id],
        )?;
        if n == 0 {
            return Err(ContactError::ConversationNotFound {
                id: conversation_id.to_string(),
            });
        }
        db.execute(
            "INSERT INTO conversation_messages
             (id, conversation_id, direction, content, external_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                id,
                conversation_id,
                direction.as_str(),
                content,
                external_id,
                at_str
            ],
        )?;
        Ok(ConversationMessage {
            id,
            conversation_id: conversation_id.to_string(),
            direction,
            content: content.to_string(),
            external_id: external_id.map(String::from),
            created_at: at_str,
        })
    }

    /// Messages of a conversation, ordered by created_at.
    pub fn messages(&self, conversation_id: &str) -> Result<Vec<ConversationMessage>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, conversation_id, direction, content, external_id, created_at
             FROM conversation_messages
             WHERE conversation_id = ?1
             ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map(rusqlite::params![conversation_id], |row| {
            let dir: String = row.get(2)?;
            Ok(ConversationMessage {
                id: row.get(0)?,
                conversation_id: row.get(1)?,
                direction: Direction::from_str(&dir)
                    .unwrap_or(Direction::Inbound),
                content: row.get(3)?,
                external_id: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

// --- row mappers -----------------------------------------------------------

fn row_to_lead(row: &rusqlite::Row<'_>) -> rusqlite::Result<Lead> {
    Ok(Lead {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        company_name: row.get(2)?,
        website: row.get(3)?,
        industry: row.get(4)?,
        source: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn row_to_contact(row: &rusqlite::Row<'_>) -> rusqlite::Result<Contact> {
    Ok(Contact {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        lead_id: row.get(2)?,
        name: row.get(3)?,
        email: row.get(4)?,
        phone: row.get(5)?,
        position: row.get(6)?,
        is_primary: row.get::<_, i64>(7)? != 0,
        unsubscribed: row.get::<_, i64>(8)? != 0,
        created_at: row.get(9)?,
    })
}

fn row_to_prospect(row: &rusqlite::Row<'_>) -> rusqlite::Result<Prospect> {
    let kind: String = row.get(3)?;
    let status: String = row.get(9)?;
    Ok(Prospect {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        group_id: row.get(2)?,
        channel_kind: kind.parse().unwrap_or(outflow_core::ChannelKind::Telegram),
        display_name: row.get(4)?,
        username: row.get(5)?,
        phone: row.get(6)?,
        telegram_user_id: row.get(7)?,
        peer_address: row.get(8)?,
        status: status.parse().unwrap_or(ProspectStatus::Pending),
        last_messaged_at: row.get(10)?,
        last_replied_at: row.get(11)?,
        last_watermark_external_id: row.get(12)?,
        converted_lead_id: row.get(13)?,
        created_at: row.get(14)?,
    })
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let kind: String = row.get(2)?;
    let status: String = row.get(7)?;
    Ok(Conversation {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        channel_kind: kind.parse().unwrap_or(outflow_core::ChannelKind::Telegram),
        channel_config_id: row.get(3)?,
        contact_id: row.get(4)?,
        prospect_id: row.get(5)?,
        lead_id: row.get(6)?,
        status: if status == "CLOSED" {
            ConversationStatus::Closed
        } else {
            ConversationStatus::Open
        },
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}
