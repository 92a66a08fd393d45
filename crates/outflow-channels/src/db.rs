use rusqlite::Connection;

use crate::error::Result;

/// Initialise the channel config table. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS channel_configs (
            id          TEXT    NOT NULL PRIMARY KEY,
            tenant_id   TEXT    NOT NULL,
            kind        TEXT    NOT NULL,
            name        TEXT    NOT NULL,
            active      INTEGER NOT NULL DEFAULT 1,
            is_default  INTEGER NOT NULL DEFAULT 0,
            credentials TEXT    NOT NULL,   -- {\"encrypted\": b64} or legacy plain JSON
            settings    TEXT    NOT NULL,   -- JSON ChannelSettings
            created_at  TEXT    NOT NULL,
            updated_at  TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_channel_configs_tenant
            ON channel_configs (tenant_id, kind);
        ",
    )?;
    Ok(())
}
