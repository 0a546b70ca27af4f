//! Sync record, queue entry and conflict models.

use serde::{Deserialize, Serialize};

use super::invoice::InvoicePayload;

/// Per-record synchronization state.
///
/// ```text
/// PENDING → SYNCING → SYNCED | CONFLICT | ERROR
/// CONFLICT → (resolution applied) → PENDING
/// ERROR → (manual requeue) → PENDING
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    #[default]
    Pending,
    Syncing,
    Synced,
    Conflict,
    Error,
}

impl SyncStatus {
    /// All states, in lifecycle order.
    pub const ALL: [Self; 5] = [
        Self::Pending,
        Self::Syncing,
        Self::Synced,
        Self::Conflict,
        Self::Error,
    ];

    /// Get the string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Syncing => "SYNCING",
            Self::Synced => "SYNCED",
            Self::Conflict => "CONFLICT",
            Self::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "SYNCING" => Ok(Self::Syncing),
            "SYNCED" => Ok(Self::Synced),
            "CONFLICT" => Ok(Self::Conflict),
            "ERROR" => Ok(Self::Error),
            _ => Err(format!("Unknown sync status: {s}")),
        }
    }
}

/// Remote effect a queue entry asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INSERT" => Ok(Self::Insert),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            _ => Err(format!("Unknown queue operation: {s}")),
        }
    }
}

/// An invoice record with its sync metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Client-generated UUID, immutable
    pub id: String,

    #[serde(flatten)]
    pub payload: InvoicePayload,

    /// Creation timestamp (Unix milliseconds)
    pub created_at: i64,

    /// Last accepted mutation (Unix milliseconds)
    pub modified_at: i64,

    pub sync_status: SyncStatus,

    /// Optimistic concurrency token, starts at 1
    pub version: i64,

    /// SHA256 over the canonical payload encoding
    pub checksum: String,

    /// Last version confirmed on the remote (0 = never synced)
    #[serde(default)]
    pub remote_version: i64,

    /// Failure captured when the record entered ERROR
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// Set while a local delete waits to reach the remote
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<i64>,
}

impl Record {
    /// Create a version-1 PENDING record with a fresh id.
    ///
    /// The checksum is filled in from the payload.
    #[must_use]
    pub fn new(payload: InvoicePayload) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        let checksum = crate::sync::compute_checksum(&payload);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            payload,
            created_at: now,
            modified_at: now,
            sync_status: SyncStatus::Pending,
            version: 1,
            checksum,
            remote_version: 0,
            last_error: None,
            deleted_at: None,
            synced_at: None,
        }
    }

    /// Whether a local delete is waiting to be pushed.
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Short id for display (first 8 chars).
    #[must_use]
    pub fn short_id(&self) -> &str {
        self.id.get(..8).unwrap_or(&self.id)
    }
}

/// One durable intended remote effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueEntry {
    /// Insertion order, defines replay order
    pub sequence: i64,
    pub record_id: String,
    pub operation: Operation,

    /// Payload captured at enqueue time
    pub payload: InvoicePayload,

    /// Record version the snapshot belongs to
    pub version: i64,

    pub retry_count: u32,
    pub last_error: Option<String>,
    pub enqueued_at: i64,
}

/// A divergence between local and remote that awaits a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictEntry {
    pub id: i64,
    pub record_id: String,
    pub local_version: i64,
    pub remote_version: i64,
    pub local_payload: InvoicePayload,
    pub remote_payload: InvoicePayload,
    pub remote_modified_at: i64,
    /// Strategy in force when the conflict was detected
    pub strategy: String,
    pub detected_at: i64,
    pub resolved_at: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in SyncStatus::ALL {
            assert_eq!(status.as_str().parse::<SyncStatus>().unwrap(), status);
        }
        assert_eq!("synced".parse::<SyncStatus>().unwrap(), SyncStatus::Synced);
        assert!("gone".parse::<SyncStatus>().is_err());
    }

    #[test]
    fn test_new_record_defaults() {
        let payload = InvoicePayload::draft("INV");
        let record = Record::new(payload.clone());
        assert_eq!(record.version, 1);
        assert_eq!(record.sync_status, SyncStatus::Pending);
        assert_eq!(record.remote_version, 0);
        assert_eq!(record.checksum, crate::sync::compute_checksum(&payload));
        assert_eq!(record.short_id().len(), 8);
    }
}
