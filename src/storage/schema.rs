//! Database schema definitions.
//!
//! Timestamps are stored as INTEGER (Unix milliseconds). Payloads are stored
//! as JSON text; the few payload fields used for listing and duplicate
//! screening are denormalized into their own columns.

use rusqlite::{Connection, Result};

/// Current schema version for migration tracking.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// The complete SQL schema for the local store.
pub const SCHEMA_SQL: &str = r#"
-- ====================
-- Schema Version Tracking
-- ====================

CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at INTEGER NOT NULL
);

-- ====================
-- Core Tables
-- ====================

-- Records: one invoice plus its sync metadata
CREATE TABLE IF NOT EXISTS records (
    id TEXT PRIMARY KEY,
    invoice_number TEXT NOT NULL,
    client_name TEXT NOT NULL,
    total_amount INTEGER NOT NULL,
    payload TEXT NOT NULL,
    checksum TEXT NOT NULL,
    version INTEGER NOT NULL DEFAULT 1,
    remote_version INTEGER NOT NULL DEFAULT 0,
    sync_status TEXT NOT NULL DEFAULT 'PENDING',
    last_error TEXT,
    created_at INTEGER NOT NULL,
    modified_at INTEGER NOT NULL,
    deleted_at INTEGER,
    synced_at INTEGER,
    CHECK (version >= 1),
    CHECK (sync_status IN ('PENDING', 'SYNCING', 'SYNCED', 'CONFLICT', 'ERROR'))
);

CREATE INDEX IF NOT EXISTS idx_records_status ON records(sync_status);
CREATE INDEX IF NOT EXISTS idx_records_created ON records(created_at DESC);
CREATE INDEX IF NOT EXISTS idx_records_invoice_number ON records(invoice_number);

-- Sync queue: append-only log of intended remote effects
CREATE TABLE IF NOT EXISTS sync_queue (
    sequence INTEGER PRIMARY KEY AUTOINCREMENT,
    record_id TEXT NOT NULL,
    operation TEXT NOT NULL,
    payload TEXT NOT NULL,
    version INTEGER NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    enqueued_at INTEGER NOT NULL,
    FOREIGN KEY (record_id) REFERENCES records(id) ON DELETE CASCADE,
    CHECK (operation IN ('INSERT', 'UPDATE', 'DELETE'))
);

CREATE INDEX IF NOT EXISTS idx_sync_queue_record ON sync_queue(record_id, sequence);

-- Conflicts: divergences kept for inspection and manual resolution
CREATE TABLE IF NOT EXISTS sync_conflicts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    record_id TEXT NOT NULL,
    local_version INTEGER NOT NULL,
    remote_version INTEGER NOT NULL,
    local_payload TEXT NOT NULL,
    remote_payload TEXT NOT NULL,
    remote_modified_at INTEGER NOT NULL,
    strategy TEXT NOT NULL,
    detected_at INTEGER NOT NULL,
    resolved_at INTEGER,
    FOREIGN KEY (record_id) REFERENCES records(id) ON DELETE CASCADE
);

-- At most one open conflict per record
CREATE UNIQUE INDEX IF NOT EXISTS idx_sync_conflicts_open
    ON sync_conflicts(record_id) WHERE resolved_at IS NULL;

-- ====================
-- Audit Events
-- ====================

CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    actor TEXT NOT NULL,
    old_value TEXT,
    new_value TEXT,
    comment TEXT,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id, created_at DESC);

-- ====================
-- Triggers
-- ====================

-- Versions only move forward
CREATE TRIGGER IF NOT EXISTS records_version_monotonic
BEFORE UPDATE OF version ON records
WHEN NEW.version < OLD.version
BEGIN
    SELECT RAISE(ABORT, 'record version cannot decrease');
END;

-- Resolving a conflict stamps it once
CREATE TRIGGER IF NOT EXISTS sync_conflicts_resolve_once
BEFORE UPDATE OF resolved_at ON sync_conflicts
WHEN OLD.resolved_at IS NOT NULL
BEGIN
    SELECT RAISE(ABORT, 'conflict already resolved');
END;
"#;

/// Apply the schema to a connection.
///
/// # Errors
///
/// Returns an error if a pragma or DDL statement fails.
pub fn apply_schema(conn: &Connection) -> Result<()> {
    // Set pragmas before schema creation
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;

    conn.execute_batch(SCHEMA_SQL)?;

    // Record schema version
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
        rusqlite::params![
            format!("v{CURRENT_SCHEMA_VERSION}"),
            chrono::Utc::now().timestamp_millis()
        ],
    )?;

    Ok(())
}
