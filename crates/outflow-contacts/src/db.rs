use rusqlite::Connection;

use crate::error::Result;

/// Initialise the directory schema. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS tenants (
            id                 TEXT    NOT NULL PRIMARY KEY,
            name               TEXT    NOT NULL,
            utc_offset_minutes INTEGER NOT NULL DEFAULT 0,
            created_at         TEXT    NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS leads (
            id           TEXT NOT NULL PRIMARY KEY,
            tenant_id    TEXT NOT NULL,
            company_name TEXT NOT NULL,
            website      TEXT,
            industry     TEXT,
            source       TEXT,
            created_at   TEXT NOT NULL
        ) STRICT;
        CREATE INDEX IF NOT EXISTS idx_leads_tenant ON leads (tenant_id);

        CREATE TABLE IF NOT EXISTS contacts (
            id           TEXT    NOT NULL PRIMARY KEY,
            tenant_id    TEXT    NOT NULL,
            lead_id      TEXT    NOT NULL,
            name         TEXT    NOT NULL,
            email        TEXT,
            phone        TEXT,
            position     TEXT,
            is_primary   INTEGER NOT NULL DEFAULT 0,
            unsubscribed INTEGER NOT NULL DEFAULT 0,
            created_at   TEXT    NOT NULL
        ) STRICT;
        CREATE INDEX IF NOT EXISTS idx_contacts_lead ON contacts (tenant_id, lead_id);

        CREATE TABLE IF NOT EXISTS prospect_groups (
            id                TEXT NOT NULL PRIMARY KEY,
            tenant_id         TEXT NOT NULL,
            channel_config_id TEXT NOT NULL,
            channel_kind      TEXT NOT NULL,
            platform_group_id TEXT NOT NULL,
            name              TEXT NOT NULL,
            created_at        TEXT NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS prospects (
            id                         TEXT    NOT NULL PRIMARY KEY,
            tenant_id                  TEXT    NOT NULL,
            group_id                   TEXT    NOT NULL,
            channel_kind               TEXT    NOT NULL,
            display_name               TEXT    NOT NULL,
            username                   TEXT,
            phone                      TEXT,
            telegram_user_id           INTEGER,
            peer_address               TEXT    NOT NULL,
            status                     TEXT    NOT NULL DEFAULT 'PENDING',
            last_messaged_at           TEXT,
            last_replied_at            TEXT,
            last_watermark_external_id TEXT,
            converted_lead_id          TEXT,
            created_at                 TEXT    NOT NULL
        ) STRICT;
        -- Re-importing a group must not duplicate its members.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_prospects_identity
            ON prospects (tenant_id, group_id, peer_address);
        CREATE INDEX IF NOT EXISTS idx_prospects_status
            ON prospects (tenant_id, channel_kind, status);

        CREATE TABLE IF NOT EXISTS conversations (
            id                TEXT NOT NULL PRIMARY KEY,
            tenant_id         TEXT NOT NULL,
            channel_kind      TEXT NOT NULL,
            channel_config_id TEXT NOT NULL,
            contact_id        TEXT,
            prospect_id       TEXT,
            lead_id           TEXT,
            status            TEXT NOT NULL DEFAULT 'OPEN',
            created_at        TEXT NOT NULL,
            updated_at        TEXT NOT NULL
        ) STRICT;
        -- At most one OPEN conversation per (peer, channel).
        CREATE UNIQUE INDEX IF NOT EXISTS idx_conversations_open_contact
            ON conversations (tenant_id, channel_kind, contact_id)
            WHERE status = 'OPEN' AND contact_id IS NOT NULL;
        CREATE UNIQUE INDEX IF NOT EXISTS idx_conversations_open_prospect
            ON conversations (tenant_id, channel_kind, prospect_id)
            WHERE status = 'OPEN' AND prospect_id IS NOT NULL;

        CREATE TABLE IF NOT EXISTS conversation_messages (
            id              TEXT NOT NULL PRIMARY KEY,
            conversation_id TEXT NOT NULL,
            direction       TEXT NOT NULL,
            content         TEXT NOT NULL,
            external_id     TEXT,
            created_at      TEXT NOT NULL
        ) STRICT;
        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON conversation_messages (conversation_id, created_at);
        ",
    )?;
    Ok(())
}
