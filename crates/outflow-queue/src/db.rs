use rusqlite::Connection;

use crate::error::Result;

/// Initialise the queue schema in `conn`.
///
/// Safe to call on every startup. The composite index matches the lease
/// query exactly (status + run_after filter, priority/run_after/id order).
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS jobs (
            id           TEXT    NOT NULL PRIMARY KEY,
            tenant_id    TEXT,
            kind         TEXT    NOT NULL,
            payload      TEXT    NOT NULL,   -- opaque JSON
            priority     INTEGER NOT NULL DEFAULT 5,
            status       TEXT    NOT NULL DEFAULT 'pending',
            attempts     INTEGER NOT NULL DEFAULT 0,
            max_attempts INTEGER NOT NULL DEFAULT 3,
            run_after    TEXT    NOT NULL,   -- ISO-8601
            lease_until  TEXT,               -- ISO-8601 or NULL
            started_at   TEXT,
            completed_at TEXT,
            error        TEXT,
            created_at   TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_jobs_lease
            ON jobs (status, run_after, priority);
        CREATE INDEX IF NOT EXISTS idx_jobs_kind
            ON jobs (kind, status);
        ",
    )?;
    Ok(())
}
