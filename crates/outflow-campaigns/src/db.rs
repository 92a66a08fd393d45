use rusqlite::Connection;

use crate::error::Result;

/// Initialise the campaign schema. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS campaigns (
            id                       TEXT    NOT NULL PRIMARY KEY,
            tenant_id                TEXT    NOT NULL,
            name                     TEXT    NOT NULL,
            campaign_type            TEXT    NOT NULL,
            status                   TEXT    NOT NULL DEFAULT 'DRAFT',
            scheduled_at             TEXT,
            started_at               TEXT,
            completed_at             TEXT,
            message_interval_seconds INTEGER NOT NULL DEFAULT 0,
            target_filter            TEXT,               -- opaque JSON snapshot
            created_at               TEXT    NOT NULL
        ) STRICT;
        CREATE INDEX IF NOT EXISTS idx_campaigns_tenant ON campaigns (tenant_id, status);

        CREATE TABLE IF NOT EXISTS campaign_steps (
            id                TEXT    NOT NULL PRIMARY KEY,
            campaign_id       TEXT    NOT NULL,
            step_order        INTEGER NOT NULL,
            channel_kind      TEXT    NOT NULL,
            channel_config_id TEXT    NOT NULL,
            template_id       TEXT    NOT NULL,
            delay_days        INTEGER NOT NULL DEFAULT 0,
            delay_hours       INTEGER NOT NULL DEFAULT 0,
            delay_minutes     INTEGER NOT NULL DEFAULT 0,
            send_time         TEXT                -- 'HH:MM-HH:MM', tenant-local
        ) STRICT;
        CREATE UNIQUE INDEX IF NOT EXISTS idx_steps_order
            ON campaign_steps (campaign_id, step_order);

        CREATE TABLE IF NOT EXISTS recipients (
            id             TEXT    NOT NULL PRIMARY KEY,
            tenant_id      TEXT    NOT NULL,
            campaign_id    TEXT    NOT NULL,
            lead_id        TEXT,
            contact_id     TEXT,
            prospect_id    TEXT,
            status         TEXT    NOT NULL DEFAULT 'PENDING',
            current_step   INTEGER NOT NULL DEFAULT 1,
            next_action_at TEXT,
            metadata       TEXT    NOT NULL DEFAULT '{}',
            created_at     TEXT    NOT NULL
        ) STRICT;
        -- Re-adding the same target to a campaign is a no-op.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_recipients_contact
            ON recipients (campaign_id, contact_id) WHERE contact_id IS NOT NULL;
        CREATE UNIQUE INDEX IF NOT EXISTS idx_recipients_prospect
            ON recipients (campaign_id, prospect_id) WHERE prospect_id IS NOT NULL;
        CREATE INDEX IF NOT EXISTS idx_recipients_campaign
            ON recipients (campaign_id, status);
        CREATE INDEX IF NOT EXISTS idx_recipients_prospect_lookup
            ON recipients (tenant_id, prospect_id);

        CREATE TABLE IF NOT EXISTS contact_attempts (
            id               TEXT NOT NULL PRIMARY KEY,
            tenant_id        TEXT NOT NULL,
            campaign_id      TEXT,
            campaign_step_id TEXT,
            recipient_id     TEXT,
            lead_id          TEXT,
            contact_id       TEXT,
            channel_kind     TEXT NOT NULL,
            direction        TEXT NOT NULL,
            status           TEXT NOT NULL,
            subject          TEXT,
            body             TEXT NOT NULL,
            external_id      TEXT,
            sent_at          TEXT,
            delivered_at     TEXT,
            opened_at        TEXT,
            clicked_at       TEXT,
            replied_at       TEXT,
            created_at       TEXT NOT NULL,
            metadata         TEXT NOT NULL DEFAULT '{}'
        ) STRICT;
        CREATE INDEX IF NOT EXISTS idx_attempts_recipient
            ON contact_attempts (recipient_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_attempts_contact
            ON contact_attempts (tenant_id, contact_id, direction, created_at);

        CREATE TABLE IF NOT EXISTS templates (
            id           TEXT    NOT NULL PRIMARY KEY,
            tenant_id    TEXT    NOT NULL,
            channel_kind TEXT    NOT NULL,
            name         TEXT    NOT NULL,
            subject      TEXT,
            body         TEXT    NOT NULL,
            use_ai       INTEGER NOT NULL DEFAULT 0,
            variations   TEXT    NOT NULL DEFAULT '[]',  -- JSON [{subject?, body}]
            created_at   TEXT    NOT NULL
        ) STRICT;
        ",
    )?;
    Ok(())
}
