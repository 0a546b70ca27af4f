//! Sync types shared by the resolver, engine and status reporting.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::storage::StatusCounts;

/// Conflict resolution strategy.
///
/// When the remote copy of a record diverged from the local one, this
/// determines what the reconciled record looks like.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// The copy with the later `modified_at` wins outright.
    #[default]
    LastWriteWins,
    /// Remote baseline, with line items merged by key.
    FieldMerge,
    /// Park the record in CONFLICT until someone decides.
    Manual,
}

impl ResolutionStrategy {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::LastWriteWins => "last_write_wins",
            Self::FieldMerge => "field_merge",
            Self::Manual => "manual",
        }
    }
}

impl std::fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResolutionStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let canonical = crate::validate::normalize_strategy(s).map_err(|(name, suggestion)| {
            Error::UnknownStrategy { name, suggestion }
        })?;
        match canonical.as_str() {
            "last_write_wins" => Ok(Self::LastWriteWins),
            "field_merge" => Ok(Self::FieldMerge),
            "manual" => Ok(Self::Manual),
            _ => Err(Error::UnknownStrategy {
                name: s.to_string(),
                suggestion: None,
            }),
        }
    }
}

/// Which side wins a last-write-wins tie on `modified_at`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    #[default]
    PreferRemote,
    PreferLocal,
}

impl std::str::FromStr for TieBreak {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "remote" | "prefer_remote" => Ok(Self::PreferRemote),
            "local" | "prefer_local" => Ok(Self::PreferLocal),
            _ => Err(Error::Config(format!(
                "unknown tie-break '{s}' (expected 'remote' or 'local')"
            ))),
        }
    }
}

/// How one record's sync attempt ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecordOutcome {
    /// Every queued entry reached the remote.
    Synced,
    /// Parked in CONFLICT for a manual decision.
    Conflict,
    /// Parked in ERROR; the entry is kept.
    Failed { reason: String },
    /// Interrupted by shutdown; the record is PENDING again.
    Cancelled,
    /// Someone else held the record.
    Skipped,
}

/// Result for a single record within a sweep.
#[derive(Debug, Clone, Serialize)]
pub struct RecordReport {
    pub record_id: String,
    #[serde(flatten)]
    pub outcome: RecordOutcome,
    /// Delivery attempts made, including the successful one
    pub attempts: u32,
    /// Conflicts resolved automatically along the way
    pub resolved_conflicts: u32,
}

/// Statistics for one sweep.
#[derive(Debug, Default, Clone, Serialize)]
pub struct SweepReport {
    pub records: Vec<RecordReport>,
    /// Shutdown stopped the sweep before every batch ran
    pub cancelled: bool,
    pub started_at: i64,
    pub finished_at: i64,
}

impl SweepReport {
    fn count(&self, pred: impl Fn(&RecordOutcome) -> bool) -> usize {
        self.records.iter().filter(|r| pred(&r.outcome)).count()
    }

    #[must_use]
    pub fn synced(&self) -> usize {
        self.count(|o| matches!(o, RecordOutcome::Synced))
    }

    #[must_use]
    pub fn conflicts(&self) -> usize {
        self.count(|o| matches!(o, RecordOutcome::Conflict))
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, RecordOutcome::Failed { .. }))
    }

    /// Number of conflicts settled by the configured strategy.
    #[must_use]
    pub fn auto_resolved(&self) -> u32 {
        self.records.iter().map(|r| r.resolved_conflicts).sum()
    }

    /// Returns true if the sweep found nothing to do.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Sync status information.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatusReport {
    /// Records per sync status.
    pub counts: StatusCounts,
    /// Entries waiting in the queue.
    pub queue_depth: usize,
    /// Conflicts waiting for a manual decision.
    pub open_conflicts: usize,
    /// Enqueue time of the oldest queued entry.
    pub oldest_pending_at: Option<i64>,
    /// Configured remote, if any.
    pub remote_url: Option<String>,
    pub strategy: ResolutionStrategy,
}
