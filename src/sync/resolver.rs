//! Conflict resolution.
//!
//! Resolution is pure: it looks at the local and remote copies of one record
//! and produces the reconciled record, or defers. Nothing here touches
//! storage or the network; the engine installs the result through the
//! optimistic concurrency path.
//!
//! Every resolved record carries `version = max(local, remote) + 1` and a
//! checksum recomputed from its payload.

use std::collections::HashSet;

use crate::model::{InvoicePayload, LineItem, Record, SyncStatus};
use crate::sync::compute_checksum;
use crate::sync::types::{ResolutionStrategy, TieBreak};

/// Outcome of reconciling two copies of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The record to install locally and push to the remote.
    Resolved(Record),
    /// No automatic decision; the record waits in CONFLICT.
    Deferred,
}

/// Resolver configured with a strategy and a tie-break rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConflictResolver {
    pub strategy: ResolutionStrategy,
    pub tie_break: TieBreak,
}

impl ConflictResolver {
    #[must_use]
    pub const fn new(strategy: ResolutionStrategy, tie_break: TieBreak) -> Self {
        Self {
            strategy,
            tie_break,
        }
    }

    /// Reconcile `local` with `remote` as of now.
    #[must_use]
    pub fn resolve(&self, local: &Record, remote: &Record) -> Resolution {
        resolve_at(
            local,
            remote,
            self.strategy,
            self.tie_break,
            chrono::Utc::now().timestamp_millis(),
        )
    }
}

/// Reconcile two copies of a record at a fixed time `now` (Unix millis).
#[must_use]
pub fn resolve_at(
    local: &Record,
    remote: &Record,
    strategy: ResolutionStrategy,
    tie_break: TieBreak,
    now: i64,
) -> Resolution {
    let version = local.version.max(remote.version) + 1;

    let (payload, modified_at) = match strategy {
        ResolutionStrategy::Manual => return Resolution::Deferred,
        ResolutionStrategy::LastWriteWins => {
            let winner = if local_wins(local, remote, tie_break) {
                local
            } else {
                remote
            };
            (winner.payload.clone(), winner.modified_at)
        }
        ResolutionStrategy::FieldMerge => (merge_fields(&local.payload, &remote.payload), now),
    };

    Resolution::Resolved(Record {
        id: local.id.clone(),
        checksum: compute_checksum(&payload),
        payload,
        created_at: local.created_at,
        modified_at,
        sync_status: SyncStatus::Pending,
        version,
        remote_version: remote.version,
        last_error: None,
        deleted_at: None,
        synced_at: local.synced_at,
    })
}

fn local_wins(local: &Record, remote: &Record, tie_break: TieBreak) -> bool {
    match local.modified_at.cmp(&remote.modified_at) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => tie_break == TieBreak::PreferLocal,
    }
}

/// Remote baseline with the mergeable fields combined.
///
/// `line_items` are merged by key and `total_amount` follows from them.
/// Every other field is taken from the remote as is.
fn merge_fields(local: &InvoicePayload, remote: &InvoicePayload) -> InvoicePayload {
    let mut merged = remote.clone();
    merged.line_items = merge_line_items(&local.line_items, &remote.line_items);
    merged.renumber_items();
    merged.recompute_total();
    merged
}

/// Union of both sides by stable key.
///
/// Remote lines keep their order and win on shared keys; lines only the
/// local side has are appended in local order.
fn merge_line_items(local: &[LineItem], remote: &[LineItem]) -> Vec<LineItem> {
    let remote_keys: HashSet<&str> = remote.iter().map(|item| item.key.as_str()).collect();

    remote
        .iter()
        .chain(
            local
                .iter()
                .filter(|item| !remote_keys.contains(item.key.as_str())),
        )
        .cloned()
        .collect()
}
