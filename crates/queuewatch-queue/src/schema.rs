//! Database schema management.

use rusqlite::Connection;
use tokio_rusqlite::Error;

/// Initialize the database schema.
pub fn init_schema(conn: &Connection) -> Result<(), Error> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

const SCHEMA: &str = r#"
-- Work items, one row per enqueued payload
CREATE TABLE IF NOT EXISTS queue (
    id TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    claimed_at TEXT,
    processed_at TEXT,
    claimant TEXT,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT
);

-- Claim scans pending rows oldest first
CREATE INDEX IF NOT EXISTS idx_queue_status_created ON queue(status, created_at);

-- Other writers may use CURRENT_TIMESTAMP, an offset or unix seconds.
-- Rewrite those to the canonical UTC form so text order is time order.
CREATE TRIGGER IF NOT EXISTS trg_queue_created_at
AFTER INSERT ON queue
WHEN NEW.created_at NOT GLOB '[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9]T[0-9][0-9]:[0-9][0-9]:[0-9][0-9].[0-9][0-9][0-9]Z'
BEGIN
    UPDATE queue SET created_at = COALESCE(
        CASE WHEN NEW.created_at NOT GLOB '*[^0-9]*'
            THEN strftime('%Y-%m-%dT%H:%M:%fZ', NEW.created_at, 'unixepoch')
            ELSE strftime('%Y-%m-%dT%H:%M:%fZ', NEW.created_at)
        END,
        NEW.created_at)
    WHERE rowid = NEW.rowid;
END;

-- Same rewrite for rows written before the trigger existed
UPDATE queue SET created_at = COALESCE(
    CASE WHEN created_at NOT GLOB '*[^0-9]*'
        THEN strftime('%Y-%m-%dT%H:%M:%fZ', created_at, 'unixepoch')
        ELSE strftime('%Y-%m-%dT%H:%M:%fZ', created_at)
    END,
    created_at)
WHERE created_at NOT GLOB '[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9]T[0-9][0-9]:[0-9][0-9]:[0-9][0-9].[0-9][0-9][0-9]Z';
"#;
