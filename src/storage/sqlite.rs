//! SQLite storage implementation.
//!
//! This module provides the local record store using SQLite. Every write goes
//! through [`SqliteStorage::mutate`], which wraps the work in an IMMEDIATE
//! transaction and appends the audit events before committing. A record write
//! and its queue entry are always committed together.

use crate::error::{Error, Result};
use crate::model::{ConflictEntry, InvoicePayload, Operation, QueueEntry, Record, SyncStatus};
use crate::storage::events::{get_events, insert_event, Event, EventType};
use crate::storage::schema::apply_schema;
use crate::sync::compute_checksum;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, Transaction};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;

/// Entity type used for record audit events.
const RECORD_ENTITY: &str = "record";

const RECORD_COLUMNS: &str = "id, payload, checksum, version, remote_version, sync_status, \
     last_error, created_at, modified_at, deleted_at, synced_at";

const QUEUE_COLUMNS: &str =
    "sequence, record_id, operation, payload, version, retry_count, last_error, enqueued_at";

const CONFLICT_COLUMNS: &str = "id, record_id, local_version, remote_version, local_payload, \
     remote_payload, remote_modified_at, strategy, detected_at, resolved_at";

/// SQLite-based storage backend.
#[derive(Debug)]
pub struct SqliteStorage {
    conn: Connection,
}

/// Context for a mutation operation, collecting its audit events.
pub struct MutationContext {
    /// Name of the operation being performed.
    pub op_name: String,
    /// Actor performing the operation (user, agent, ...).
    pub actor: String,
    /// Events to write at the end of the transaction.
    pub events: Vec<Event>,
}

impl MutationContext {
    /// Create a new mutation context.
    #[must_use]
    pub fn new(op_name: &str, actor: &str) -> Self {
        Self {
            op_name: op_name.to_string(),
            actor: actor.to_string(),
            events: Vec::new(),
        }
    }

    /// Record an event for this operation.
    pub fn record_event(&mut self, entity_id: &str, event_type: EventType) {
        self.events
            .push(Event::new(RECORD_ENTITY, entity_id, event_type, &self.actor));
    }

    /// Record an event with old/new values for field tracking.
    pub fn record_change(
        &mut self,
        entity_id: &str,
        event_type: EventType,
        old_value: Option<String>,
        new_value: Option<String>,
    ) {
        self.events.push(
            Event::new(RECORD_ENTITY, entity_id, event_type, &self.actor)
                .with_values(old_value, new_value),
        );
    }

    /// Record an event carrying a free-form comment.
    pub fn record_comment(&mut self, entity_id: &str, event_type: EventType, comment: &str) {
        self.events.push(
            Event::new(RECORD_ENTITY, entity_id, event_type, &self.actor).with_comment(comment),
        );
    }

    /// Record a status transition.
    fn record_status(&mut self, entity_id: &str, old: SyncStatus, new: SyncStatus) {
        if old != new {
            self.record_change(
                entity_id,
                EventType::StatusChanged,
                Some(old.to_string()),
                Some(new.to_string()),
            );
        }
    }
}

/// Record counts per sync status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub syncing: usize,
    pub synced: usize,
    pub conflict: usize,
    pub error: usize,
}

impl StatusCounts {
    /// Returns total number of records.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.pending + self.syncing + self.synced + self.conflict + self.error
    }

    fn slot(&mut self, status: SyncStatus) -> &mut usize {
        match status {
            SyncStatus::Pending => &mut self.pending,
            SyncStatus::Syncing => &mut self.syncing,
            SyncStatus::Synced => &mut self.synced,
            SyncStatus::Conflict => &mut self.conflict,
            SyncStatus::Error => &mut self.error,
        }
    }
}

/// What `delete` did with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    /// Never reached the remote; removed locally right away.
    Purged,
    /// Tombstoned with a DELETE queued for the remote.
    Queued,
}

/// A conditional write, applied only if the stored version matches.
#[derive(Debug, Clone)]
pub struct CasWrite<'a> {
    pub payload: &'a InvoicePayload,
    /// Version stored on success; must not be lower than the current one
    pub version: i64,
    pub modified_at: i64,
    /// New status; when unset, a SYNCED record that gets an entry goes
    /// back to PENDING and any other status is kept
    pub status: Option<SyncStatus>,
    /// Overwrites `remote_version` when set
    pub remote_version: Option<i64>,
    /// Drops INSERT/UPDATE entries at or below this version first
    pub supersedes: Option<i64>,
    /// Queue entry appended on success
    pub enqueue: Option<Operation>,
    pub event: EventType,
}

impl SqliteStorage {
    /// Open a database at the given path.
    ///
    /// Creates the database and applies schema if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, None)
    }

    /// Open a database with an optional busy timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open_with_timeout(path: &Path, timeout_ms: Option<u64>) -> Result<Self> {
        let conn = Connection::open(path)?;

        if let Some(timeout) = timeout_ms {
            conn.busy_timeout(Duration::from_millis(timeout))?;
        } else {
            // Default 5 second timeout
            conn.busy_timeout(Duration::from_secs(5))?;
        }

        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Get a reference to the underlying connection (for read operations).
    #[must_use]
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Execute a mutation with the transaction protocol.
    ///
    /// This method:
    /// 1. Begins an IMMEDIATE transaction (for write locking)
    /// 2. Executes the mutation closure
    /// 3. Writes audit events
    /// 4. Commits
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails. The transaction is rolled back
    /// when it is dropped uncommitted.
    pub fn mutate<F, R>(&mut self, op: &str, actor: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction, &mut MutationContext) -> Result<R>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

        let mut ctx = MutationContext::new(op, actor);

        let result = f(&tx, &mut ctx)?;

        for event in &ctx.events {
            insert_event(&tx, event)?;
        }

        tx.commit()?;

        Ok(result)
    }

    // ==================
    // Record Operations
    // ==================

    /// Write a record and append its queue entry in one transaction.
    ///
    /// A new id is stored at version 1 with an INSERT entry. An existing id
    /// gets `version + 1`, a fresh `modified_at` and an UPDATE entry. The
    /// checksum is always recomputed from the payload. Writing an unchanged
    /// payload is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for an invalid payload,
    /// [`Error::UnresolvedConflict`] while the record awaits a manual
    /// decision and [`Error::RecordNotFound`] for a deleted record.
    pub fn put(&mut self, record: &Record, actor: &str) -> Result<Record> {
        crate::validate::validate_invoice(&record.payload)?;

        let checksum = compute_checksum(&record.payload);
        let now = chrono::Utc::now().timestamp_millis();
        let id = record.id.clone();

        self.mutate("put", actor, |tx, ctx| {
            let Some(stored) = load_record(tx, &record.id)? else {
                insert_record(tx, record, &checksum)?;
                enqueue(tx, &record.id, Operation::Insert, &record.payload, 1, now)?;
                ctx.record_change(
                    &record.id,
                    EventType::RecordCreated,
                    None,
                    Some(record.payload.invoice_number.clone()),
                );
                return Ok(());
            };

            if stored.is_deleted() {
                return Err(Error::RecordNotFound { id: record.id.clone() });
            }
            if stored.sync_status == SyncStatus::Conflict {
                return Err(Error::UnresolvedConflict { id: record.id.clone() });
            }
            if stored.checksum == checksum {
                return Ok(());
            }

            let version = stored.version + 1;
            // An in-flight attempt drains the new entry too; ERROR waits for requeue
            let status = match stored.sync_status {
                SyncStatus::Syncing | SyncStatus::Error => stored.sync_status,
                _ => SyncStatus::Pending,
            };

            tx.execute(
                "UPDATE records
                 SET invoice_number = ?1, client_name = ?2, total_amount = ?3, payload = ?4,
                     checksum = ?5, version = ?6, sync_status = ?7, modified_at = ?8
                 WHERE id = ?9",
                rusqlite::params![
                    record.payload.invoice_number,
                    record.payload.client.name,
                    record.payload.total_amount,
                    serde_json::to_string(&record.payload)?,
                    checksum,
                    version,
                    status.as_str(),
                    now,
                    record.id,
                ],
            )?;
            enqueue(tx, &record.id, Operation::Update, &record.payload, version, now)?;

            ctx.record_change(
                &record.id,
                EventType::RecordUpdated,
                Some(stored.version.to_string()),
                Some(version.to_string()),
            );
            ctx.record_status(&record.id, stored.sync_status, status);
            Ok(())
        })?;

        self.get_required(&id)
    }

    /// Get a record by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get(&self, id: &str) -> Result<Option<Record>> {
        load_record(&self.conn, id)
    }

    /// Get a record by id, failing if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RecordNotFound`] if there is no such record.
    pub fn get_required(&self, id: &str) -> Result<Record> {
        self.get(id)?
            .ok_or_else(|| Error::RecordNotFound { id: id.to_string() })
    }

    /// Resolve a full id or a unique id prefix to a full id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RecordNotFound`] when nothing matches and
    /// [`Error::InvalidArgument`] when the prefix is ambiguous.
    pub fn resolve_id(&self, id_or_prefix: &str) -> Result<String> {
        if self.get(id_or_prefix)?.is_some() {
            return Ok(id_or_prefix.to_string());
        }

        let pattern = format!("{}%", id_or_prefix.replace(['%', '_'], ""));
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM records WHERE id LIKE ?1 LIMIT 2")?;
        let ids = stmt
            .query_map([pattern], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        match ids.as_slice() {
            [id] => Ok(id.clone()),
            [] => Err(Error::RecordNotFound {
                id: id_or_prefix.to_string(),
            }),
            _ => Err(Error::InvalidArgument(format!(
                "id prefix '{id_or_prefix}' matches more than one record"
            ))),
        }
    }

    /// List records, newest first, optionally filtered by status.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_records(&self, status: Option<SyncStatus>, limit: Option<u32>) -> Result<Vec<Record>> {
        let (order, filter) = match status {
            Some(_) => ("created_at ASC", "WHERE sync_status = ?1"),
            None => ("created_at DESC", "WHERE ?1 IS NULL"),
        };
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM records {filter} ORDER BY {order}, id LIMIT ?2"
        );
        let limit = limit.map_or(-1, i64::from);

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params![status.map(|s| s.as_str()), limit],
            map_record_row,
        )?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    /// Records that are not tombstoned, used for duplicate screening.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_active(&self) -> Result<Vec<Record>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE deleted_at IS NULL ORDER BY created_at, id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], map_record_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    /// Set a record's sync status, optionally capturing an error message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RecordNotFound`] if there is no such record.
    pub fn update_status(
        &mut self,
        id: &str,
        status: SyncStatus,
        last_error: Option<&str>,
        actor: &str,
    ) -> Result<()> {
        self.mutate("update_status", actor, |tx, ctx| {
            let old = load_status(tx, id)?;
            tx.execute(
                "UPDATE records SET sync_status = ?1, last_error = ?2 WHERE id = ?3",
                rusqlite::params![status.as_str(), last_error, id],
            )?;
            ctx.record_status(id, old, status);
            Ok(())
        })
    }

    /// Tombstone a record and queue its remote delete.
    ///
    /// A record the remote has never confirmed, and that no attempt is
    /// sending, is purged locally instead. Earlier INSERT/UPDATE entries are
    /// dropped; the delete makes them moot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RecordNotFound`] for unknown or already deleted
    /// records and [`Error::UnresolvedConflict`] while a conflict is open.
    pub fn delete(&mut self, id: &str, actor: &str) -> Result<DeleteOutcome> {
        let now = chrono::Utc::now().timestamp_millis();

        self.mutate("delete", actor, |tx, ctx| {
            let stored = load_record(tx, id)?
                .filter(|r| !r.is_deleted())
                .ok_or_else(|| Error::RecordNotFound { id: id.to_string() })?;

            if stored.sync_status == SyncStatus::Conflict {
                return Err(Error::UnresolvedConflict { id: id.to_string() });
            }

            if stored.remote_version == 0 && stored.sync_status != SyncStatus::Syncing {
                tx.execute("DELETE FROM records WHERE id = ?1", [id])?;
                ctx.record_comment(id, EventType::RecordDeleted, "never synced, purged locally");
                return Ok(DeleteOutcome::Purged);
            }

            let version = stored.version + 1;
            let status = if stored.sync_status == SyncStatus::Syncing {
                SyncStatus::Syncing
            } else {
                SyncStatus::Pending
            };

            tx.execute(
                "UPDATE records
                 SET deleted_at = ?1, modified_at = ?1, version = ?2, sync_status = ?3, last_error = NULL
                 WHERE id = ?4",
                rusqlite::params![now, version, status.as_str(), id],
            )?;
            tx.execute(
                "DELETE FROM sync_queue WHERE record_id = ?1 AND operation != 'DELETE'",
                [id],
            )?;
            enqueue(tx, id, Operation::Delete, &stored.payload, version, now)?;

            ctx.record_comment(id, EventType::RecordDeleted, "remote delete queued");
            ctx.record_status(id, stored.sync_status, status);
            Ok(DeleteOutcome::Queued)
        })
    }

    /// Remove a record and everything attached to it.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn purge(&mut self, id: &str, actor: &str) -> Result<()> {
        self.mutate("purge", actor, |tx, ctx| {
            let rows = tx.execute("DELETE FROM records WHERE id = ?1", [id])?;
            if rows > 0 {
                ctx.record_comment(id, EventType::RecordDeleted, "purged after remote delete");
            }
            Ok(())
        })
    }

    /// Conditionally overwrite a record.
    ///
    /// Succeeds only if the stored version equals `expected_version`; the
    /// check and the write are one statement. Returns `false` and changes
    /// nothing on mismatch.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails.
    pub fn compare_and_set(
        &mut self,
        id: &str,
        expected_version: i64,
        write: &CasWrite<'_>,
        actor: &str,
    ) -> Result<bool> {
        let checksum = compute_checksum(write.payload);
        let payload_json = serde_json::to_string(write.payload)?;

        self.mutate("compare_and_set", actor, |tx, ctx| {
            let old_status = load_record(tx, id)?.map(|r| r.sync_status);

            let rows = tx.execute(
                "UPDATE records
                 SET invoice_number = ?1, client_name = ?2, total_amount = ?3, payload = ?4,
                     checksum = ?5, version = ?6, modified_at = ?7,
                     sync_status = COALESCE(?8, CASE WHEN ?9 AND sync_status = 'SYNCED'
                                                     THEN 'PENDING' ELSE sync_status END),
                     remote_version = COALESCE(?10, remote_version), last_error = NULL
                 WHERE id = ?11 AND version = ?12 AND deleted_at IS NULL",
                rusqlite::params![
                    write.payload.invoice_number,
                    write.payload.client.name,
                    write.payload.total_amount,
                    payload_json,
                    checksum,
                    write.version,
                    write.modified_at,
                    write.status.map(|s| s.as_str()),
                    write.enqueue.is_some(),
                    write.remote_version,
                    id,
                    expected_version,
                ],
            )?;

            if rows == 0 {
                return Ok(false);
            }

            if let Some(version) = write.supersedes {
                tx.execute(
                    "DELETE FROM sync_queue
                     WHERE record_id = ?1 AND version <= ?2 AND operation != 'DELETE'",
                    rusqlite::params![id, version],
                )?;
            }
            if let Some(op) = write.enqueue {
                enqueue(tx, id, op, write.payload, write.version, write.modified_at)?;
            }

            ctx.record_change(
                id,
                write.event,
                Some(expected_version.to_string()),
                Some(write.version.to_string()),
            );
            if let Some(old) = old_status {
                ctx.record_status(id, old, load_status(tx, id)?);
            }
            Ok(true)
        })
    }

    // ==================
    // Sync Lifecycle
    // ==================

    /// Mark a record as in flight. PENDING → SYNCING, atomically.
    ///
    /// Returns `false` if the record isn't PENDING, so at most one attempt
    /// per record can hold it.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn claim(&mut self, id: &str, actor: &str) -> Result<bool> {
        self.mutate("claim", actor, |tx, ctx| {
            let rows = tx.execute(
                "UPDATE records SET sync_status = 'SYNCING' WHERE id = ?1 AND sync_status = 'PENDING'",
                [id],
            )?;
            if rows == 1 {
                ctx.record_status(id, SyncStatus::Pending, SyncStatus::Syncing);
            }
            Ok(rows == 1)
        })
    }

    /// Hand an interrupted record back. SYNCING → PENDING.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn release(&mut self, id: &str, actor: &str) -> Result<()> {
        self.mutate("release", actor, |tx, ctx| {
            let rows = tx.execute(
                "UPDATE records SET sync_status = 'PENDING' WHERE id = ?1 AND sync_status = 'SYNCING'",
                [id],
            )?;
            if rows == 1 {
                ctx.record_status(id, SyncStatus::Syncing, SyncStatus::Pending);
            }
            Ok(())
        })
    }

    /// Return every SYNCING record to PENDING.
    ///
    /// Run before the first sweep of a process; a SYNCING row at that point
    /// was left behind by a crash.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn recover_in_flight(&mut self, actor: &str) -> Result<usize> {
        self.mutate("recover_in_flight", actor, |tx, ctx| {
            let ids = {
                let mut stmt =
                    tx.prepare("SELECT id FROM records WHERE sync_status = 'SYNCING'")?;
                let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
                rows.collect::<std::result::Result<Vec<_>, _>>()?
            };
            tx.execute(
                "UPDATE records SET sync_status = 'PENDING' WHERE sync_status = 'SYNCING'",
                [],
            )?;
            for id in &ids {
                ctx.record_status(id, SyncStatus::Syncing, SyncStatus::Pending);
            }
            Ok(ids.len())
        })
    }

    /// PENDING record ids with queued work, ordered by their oldest entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn pending_for_sweep(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT r.id
             FROM records r
             JOIN sync_queue q ON q.record_id = r.id
             WHERE r.sync_status = 'PENDING'
             GROUP BY r.id
             ORDER BY MIN(q.sequence)",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    /// Queue entries for a record in replay order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn queue_for(&self, id: &str) -> Result<Vec<QueueEntry>> {
        let sql = format!(
            "SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE record_id = ?1 ORDER BY sequence"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([id], map_queue_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    /// The next entry to replay for a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn next_entry(&self, id: &str) -> Result<Option<QueueEntry>> {
        let sql = format!(
            "SELECT {QUEUE_COLUMNS} FROM sync_queue WHERE record_id = ?1 ORDER BY sequence LIMIT 1"
        );
        self.conn
            .query_row(&sql, [id], map_queue_row)
            .optional()
            .map_err(Error::from)
    }

    /// Total number of queued entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn queue_len(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM sync_queue", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Enqueue time of the oldest queued entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn oldest_enqueued_at(&self) -> Result<Option<i64>> {
        self.conn
            .query_row("SELECT MIN(enqueued_at) FROM sync_queue", [], |row| row.get(0))
            .map_err(Error::from)
    }

    /// Retire a delivered entry.
    ///
    /// Stores the version the remote now holds. The record becomes SYNCED
    /// once its queue is empty and otherwise stays in flight.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn complete_entry(
        &mut self,
        sequence: i64,
        id: &str,
        remote_version: i64,
        actor: &str,
    ) -> Result<SyncStatus> {
        let now = chrono::Utc::now().timestamp_millis();

        self.mutate("complete_entry", actor, |tx, ctx| {
            tx.execute("DELETE FROM sync_queue WHERE sequence = ?1", [sequence])?;
            tx.execute(
                "UPDATE records
                 SET remote_version = MAX(remote_version, ?1), synced_at = ?2, last_error = NULL
                 WHERE id = ?3",
                rusqlite::params![remote_version, now, id],
            )?;

            let remaining: i64 = tx.query_row(
                "SELECT COUNT(*) FROM sync_queue WHERE record_id = ?1",
                [id],
                |row| row.get(0),
            )?;
            if remaining > 0 {
                return Ok(SyncStatus::Syncing);
            }

            let old = load_status(tx, id)?;
            tx.execute(
                "UPDATE records SET sync_status = 'SYNCED' WHERE id = ?1",
                [id],
            )?;
            ctx.record_change(id, EventType::RecordSynced, None, Some(remote_version.to_string()));
            ctx.record_status(id, old, SyncStatus::Synced);
            Ok(SyncStatus::Synced)
        })
    }

    /// Count a failed delivery attempt against an entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn record_attempt_failure(&mut self, sequence: i64, reason: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE sync_queue SET retry_count = retry_count + 1, last_error = ?1 WHERE sequence = ?2",
            rusqlite::params![reason, sequence],
        )?;
        Ok(())
    }

    /// Park a record in ERROR. Its queue entries are kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn mark_error(&mut self, id: &str, reason: &str, actor: &str) -> Result<()> {
        self.mutate("mark_error", actor, |tx, ctx| {
            let old = load_status(tx, id)?;
            tx.execute(
                "UPDATE records SET sync_status = 'ERROR', last_error = ?1 WHERE id = ?2",
                rusqlite::params![reason, id],
            )?;
            ctx.record_comment(id, EventType::SyncFailed, reason);
            ctx.record_status(id, old, SyncStatus::Error);
            Ok(())
        })
    }

    /// Manually reset an ERROR record. ERROR → PENDING, retry counts cleared.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the record is not in ERROR.
    pub fn requeue(&mut self, id: &str, actor: &str) -> Result<()> {
        self.mutate("requeue", actor, |tx, ctx| {
            let old = load_status(tx, id)?;
            if old != SyncStatus::Error {
                return Err(Error::InvalidArgument(format!(
                    "record {id} is {old}, only ERROR records can be requeued"
                )));
            }
            tx.execute(
                "UPDATE records SET sync_status = 'PENDING', last_error = NULL WHERE id = ?1",
                [id],
            )?;
            tx.execute(
                "UPDATE sync_queue SET retry_count = 0, last_error = NULL WHERE record_id = ?1",
                [id],
            )?;
            ctx.record_event(id, EventType::RecordRequeued);
            ctx.record_status(id, old, SyncStatus::Pending);
            Ok(())
        })
    }

    /// Counts per sync status.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn status_counts(&self) -> Result<StatusCounts> {
        let mut stmt = self
            .conn
            .prepare("SELECT sync_status, COUNT(*) FROM records GROUP BY sync_status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let (status, count) = row?;
            if let Ok(status) = status.parse::<SyncStatus>() {
                *counts.slot(status) = usize::try_from(count).unwrap_or(0);
            }
        }
        Ok(counts)
    }

    /// Note that a newly admitted record looks like an existing one.
    ///
    /// # Errors
    ///
    /// Returns an error if the event insert fails.
    pub fn flag_duplicate(
        &mut self,
        id: &str,
        existing_id: &str,
        score: f64,
        actor: &str,
    ) -> Result<()> {
        self.mutate("flag_duplicate", actor, |_tx, ctx| {
            ctx.record_comment(
                id,
                EventType::DuplicateFlagged,
                &format!("resembles {existing_id} (score {score:.3})"),
            );
            Ok(())
        })
    }

    /// Audit history for a record, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn events_for(&self, id: &str, limit: Option<u32>) -> Result<Vec<Event>> {
        get_events(&self.conn, RECORD_ENTITY, id, limit).map_err(Error::from)
    }

    // ==================
    // Conflict Operations
    // ==================

    /// Store a divergence and park the record in CONFLICT.
    ///
    /// Replaces the record's open conflict if it already has one.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn mark_conflict(&mut self, conflict: &ConflictEntry, actor: &str) -> Result<i64> {
        let local_json = serde_json::to_string(&conflict.local_payload)?;
        let remote_json = serde_json::to_string(&conflict.remote_payload)?;

        self.mutate("mark_conflict", actor, |tx, ctx| {
            let id = &conflict.record_id;
            let old = load_status(tx, id)?;

            tx.execute(
                "DELETE FROM sync_conflicts WHERE record_id = ?1 AND resolved_at IS NULL",
                [id],
            )?;
            let conflict_id = insert_conflict(tx, conflict, &local_json, &remote_json, None)?;

            tx.execute(
                "UPDATE records SET sync_status = 'CONFLICT' WHERE id = ?1",
                [id],
            )?;
            ctx.record_change(
                id,
                EventType::ConflictDetected,
                Some(conflict.local_version.to_string()),
                Some(conflict.remote_version.to_string()),
            );
            ctx.record_status(id, old, SyncStatus::Conflict);
            Ok(conflict_id)
        })
    }

    /// Keep an automatically resolved divergence for the record's history.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn log_resolved_conflict(&mut self, conflict: &ConflictEntry, actor: &str) -> Result<i64> {
        let local_json = serde_json::to_string(&conflict.local_payload)?;
        let remote_json = serde_json::to_string(&conflict.remote_payload)?;
        let resolved_at = conflict
            .resolved_at
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());

        self.mutate("log_resolved_conflict", actor, |tx, ctx| {
            let conflict_id =
                insert_conflict(tx, conflict, &local_json, &remote_json, Some(resolved_at))?;
            ctx.record_comment(
                &conflict.record_id,
                EventType::ConflictResolved,
                &format!("resolved by {}", conflict.strategy),
            );
            Ok(conflict_id)
        })
    }

    /// The open conflict for a record, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn open_conflict(&self, id: &str) -> Result<Option<ConflictEntry>> {
        let sql = format!(
            "SELECT {CONFLICT_COLUMNS} FROM sync_conflicts WHERE record_id = ?1 AND resolved_at IS NULL"
        );
        self.conn
            .query_row(&sql, [id], map_conflict_row)
            .optional()
            .map_err(Error::from)
    }

    /// List conflicts, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_conflicts(&self, include_resolved: bool) -> Result<Vec<ConflictEntry>> {
        let filter = if include_resolved {
            ""
        } else {
            "WHERE resolved_at IS NULL"
        };
        let sql = format!(
            "SELECT {CONFLICT_COLUMNS} FROM sync_conflicts {filter} ORDER BY detected_at DESC, id DESC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], map_conflict_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    /// Settle an open conflict with a caller-supplied payload.
    ///
    /// The payload is validated and stored at `max(local, remote) + 1`. The
    /// record's stale entries are replaced by one UPDATE carrying the
    /// resolution, and it goes back to PENDING.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the record has no open conflict
    /// and [`Error::Validation`] for an invalid payload.
    pub fn resolve_conflict(
        &mut self,
        id: &str,
        payload: &InvoicePayload,
        actor: &str,
    ) -> Result<Record> {
        crate::validate::validate_invoice(payload)?;

        let checksum = compute_checksum(payload);
        let payload_json = serde_json::to_string(payload)?;
        let now = chrono::Utc::now().timestamp_millis();

        self.mutate("resolve_conflict", actor, |tx, ctx| {
            let record = load_record(tx, id)?
                .ok_or_else(|| Error::RecordNotFound { id: id.to_string() })?;
            let conflict_id: Option<(i64, i64)> = tx
                .query_row(
                    "SELECT id, remote_version FROM sync_conflicts
                     WHERE record_id = ?1 AND resolved_at IS NULL",
                    [id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let Some((conflict_id, remote_version)) = conflict_id else {
                return Err(Error::InvalidArgument(format!(
                    "record {id} has no open conflict"
                )));
            };

            let version = record.version.max(remote_version) + 1;
            tx.execute(
                "UPDATE records
                 SET invoice_number = ?1, client_name = ?2, total_amount = ?3, payload = ?4,
                     checksum = ?5, version = ?6, remote_version = ?7, modified_at = ?8,
                     sync_status = 'PENDING', last_error = NULL
                 WHERE id = ?9",
                rusqlite::params![
                    payload.invoice_number,
                    payload.client.name,
                    payload.total_amount,
                    payload_json,
                    checksum,
                    version,
                    remote_version,
                    now,
                    id,
                ],
            )?;
            tx.execute(
                "DELETE FROM sync_queue WHERE record_id = ?1 AND operation != 'DELETE'",
                [id],
            )?;
            enqueue(tx, id, Operation::Update, payload, version, now)?;
            tx.execute(
                "UPDATE sync_conflicts SET resolved_at = ?1 WHERE id = ?2",
                rusqlite::params![now, conflict_id],
            )?;

            ctx.record_change(
                id,
                EventType::ConflictResolved,
                Some(record.version.to_string()),
                Some(version.to_string()),
            );
            ctx.record_status(id, record.sync_status, SyncStatus::Pending);
            Ok(())
        })?;

        self.get_required(id)
    }
}

// ==================
// Row helpers
// ==================

fn load_record(conn: &Connection, id: &str) -> Result<Option<Record>> {
    let sql = format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = ?1");
    conn.query_row(&sql, [id], map_record_row)
        .optional()
        .map_err(Error::from)
}

fn load_status(conn: &Connection, id: &str) -> Result<SyncStatus> {
    let status: Option<String> = conn
        .query_row("SELECT sync_status FROM records WHERE id = ?1", [id], |row| {
            row.get(0)
        })
        .optional()?;
    let status = status.ok_or_else(|| Error::RecordNotFound { id: id.to_string() })?;
    status.parse().map_err(Error::Other)
}

fn insert_record(conn: &Connection, record: &Record, checksum: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO records (id, invoice_number, client_name, total_amount, payload, checksum,
                              version, remote_version, sync_status, created_at, modified_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, 0, 'PENDING', ?7, ?8)",
        rusqlite::params![
            record.id,
            record.payload.invoice_number,
            record.payload.client.name,
            record.payload.total_amount,
            serde_json::to_string(&record.payload)?,
            checksum,
            record.created_at,
            record.modified_at,
        ],
    )?;
    Ok(())
}

fn enqueue(
    conn: &Connection,
    id: &str,
    operation: Operation,
    payload: &InvoicePayload,
    version: i64,
    now: i64,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO sync_queue (record_id, operation, payload, version, enqueued_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            id,
            operation.as_str(),
            serde_json::to_string(payload)?,
            version,
            now
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn insert_conflict(
    conn: &Connection,
    conflict: &ConflictEntry,
    local_json: &str,
    remote_json: &str,
    resolved_at: Option<i64>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO sync_conflicts (record_id, local_version, remote_version, local_payload,
                                     remote_payload, remote_modified_at, strategy, detected_at, resolved_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        rusqlite::params![
            conflict.record_id,
            conflict.local_version,
            conflict.remote_version,
            local_json,
            remote_json,
            conflict.remote_modified_at,
            conflict.strategy,
            conflict.detected_at,
            resolved_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parsed_column<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let text: String = row.get(idx)?;
    text.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into())
    })
}

fn map_record_row(row: &Row) -> rusqlite::Result<Record> {
    Ok(Record {
        id: row.get(0)?,
        payload: json_column(row, 1)?,
        checksum: row.get(2)?,
        version: row.get(3)?,
        remote_version: row.get(4)?,
        sync_status: parsed_column(row, 5)?,
        last_error: row.get(6)?,
        created_at: row.get(7)?,
        modified_at: row.get(8)?,
        deleted_at: row.get(9)?,
        synced_at: row.get(10)?,
    })
}

fn map_queue_row(row: &Row) -> rusqlite::Result<QueueEntry> {
    Ok(QueueEntry {
        sequence: row.get(0)?,
        record_id: row.get(1)?,
        operation: parsed_column(row, 2)?,
        payload: json_column(row, 3)?,
        version: row.get(4)?,
        retry_count: row.get(5)?,
        last_error: row.get(6)?,
        enqueued_at: row.get(7)?,
    })
}

fn map_conflict_row(row: &Row) -> rusqlite::Result<ConflictEntry> {
    Ok(ConflictEntry {
        id: row.get(0)?,
        record_id: row.get(1)?,
        local_version: row.get(2)?,
        remote_version: row.get(3)?,
        local_payload: json_column(row, 4)?,
        remote_payload: json_column(row, 5)?,
        remote_modified_at: row.get(6)?,
        strategy: row.get(7)?,
        detected_at: row.get(8)?,
        resolved_at: row.get(9)?,
    })
}
