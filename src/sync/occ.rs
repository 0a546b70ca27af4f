//! Optimistic concurrency control.
//!
//! Every write that isn't a brand-new record names the version it was based
//! on. The store applies it only if that version is still current; otherwise
//! nothing changes and the caller decides what to do next.

use crate::error::{Error, Result};
use crate::model::{InvoicePayload, Operation, Record, SyncStatus};
use crate::storage::{CasWrite, EventType, SqliteStorage};
use crate::validate::validate_invoice;

/// Conditionally replace a record's payload.
///
/// Succeeds only if the stored version equals `expected_version`, in which
/// case the payload is stored with a fresh checksum at `expected_version + 1`.
/// Returns `false` and leaves the record untouched otherwise. Nothing is
/// enqueued.
///
/// This is the bare conditional write. The sync engine installs
/// remotely-originated results through [`apply_resolution`], which performs
/// the same compare-and-set but also records the remote version and queues
/// the resolution; [`update_local`] does the same for user edits.
///
/// # Errors
///
/// Returns [`Error::Validation`] for an invalid payload.
pub fn try_update(
    storage: &mut SqliteStorage,
    id: &str,
    payload: &InvoicePayload,
    expected_version: i64,
    actor: &str,
) -> Result<bool> {
    validate_invoice(payload)?;

    let write = CasWrite {
        payload,
        version: expected_version + 1,
        modified_at: chrono::Utc::now().timestamp_millis(),
        status: None,
        remote_version: None,
        supersedes: None,
        enqueue: None,
        event: EventType::RecordUpdated,
    };
    storage.compare_and_set(id, expected_version, &write, actor)
}

/// Install a resolver result over the local copy it was computed from.
///
/// Older INSERT/UPDATE entries are dropped and one UPDATE carrying the
/// resolution is queued in their place, all in the same transaction.
/// Returns `false` if the local record moved past `expected_local_version`
/// in the meantime.
///
/// # Errors
///
/// Returns an error if the write fails.
pub fn apply_resolution(
    storage: &mut SqliteStorage,
    resolved: &Record,
    expected_local_version: i64,
    actor: &str,
) -> Result<bool> {
    let write = CasWrite {
        payload: &resolved.payload,
        version: resolved.version,
        modified_at: resolved.modified_at,
        status: None,
        remote_version: Some(resolved.remote_version),
        supersedes: Some(expected_local_version),
        enqueue: Some(Operation::Update),
        event: EventType::ConflictResolved,
    };
    storage.compare_and_set(&resolved.id, expected_local_version, &write, actor)
}

/// Apply a local edit made against `expected_version`.
///
/// # Errors
///
/// Returns [`Error::VersionConflict`] when the record changed since it was
/// read, [`Error::UnresolvedConflict`] while it waits for a manual decision
/// and [`Error::Validation`] for an invalid payload.
pub fn update_local(
    storage: &mut SqliteStorage,
    id: &str,
    payload: &InvoicePayload,
    expected_version: i64,
    actor: &str,
) -> Result<Record> {
    validate_invoice(payload)?;

    let current = storage.get_required(id)?;
    if current.is_deleted() {
        return Err(Error::RecordNotFound { id: id.to_string() });
    }
    if current.sync_status == SyncStatus::Conflict {
        return Err(Error::UnresolvedConflict { id: id.to_string() });
    }

    let write = CasWrite {
        payload,
        version: expected_version + 1,
        modified_at: chrono::Utc::now().timestamp_millis(),
        status: None,
        remote_version: None,
        supersedes: None,
        enqueue: Some(Operation::Update),
        event: EventType::RecordUpdated,
    };

    if storage.compare_and_set(id, expected_version, &write, actor)? {
        storage.get_required(id)
    } else {
        let actual = storage.get_required(id)?.version;
        Err(Error::VersionConflict {
            id: id.to_string(),
            expected: expected_version,
            actual,
        })
    }
}
