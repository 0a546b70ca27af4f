//! Remote record store interface.
//!
//! Defines the operations the sync engine needs from the server side. The
//! HTTP implementation lives in [`super::http`]; tests use an in-memory one.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{InvoicePayload, QueueEntry, Record, SyncStatus};
use crate::sync::compute_checksum;

/// A record as the remote holds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub id: String,
    /// Remote concurrency token, the value sent back in `If-Match`
    pub version: i64,
    pub created_at: i64,
    pub modified_at: i64,
    pub checksum: String,
    pub payload: InvoicePayload,
}

impl RemoteRecord {
    /// The body sent for a queued INSERT/UPDATE.
    ///
    /// Carries the entry's snapshot and version, not the record's current
    /// payload, so replay order is preserved.
    #[must_use]
    pub fn from_entry(record: &Record, entry: &QueueEntry) -> Self {
        Self {
            id: record.id.clone(),
            version: entry.version,
            created_at: record.created_at,
            modified_at: entry.enqueued_at,
            checksum: compute_checksum(&entry.payload),
            payload: entry.payload.clone(),
        }
    }

    /// Whether the stored checksum matches the payload.
    #[must_use]
    pub fn is_intact(&self) -> bool {
        compute_checksum(&self.payload) == self.checksum
    }

    /// View the remote copy as a local record for conflict resolution.
    #[must_use]
    pub fn to_record(&self) -> Record {
        Record {
            id: self.id.clone(),
            payload: self.payload.clone(),
            created_at: self.created_at,
            modified_at: self.modified_at,
            sync_status: SyncStatus::Synced,
            version: self.version,
            checksum: compute_checksum(&self.payload),
            remote_version: self.version,
            last_error: None,
            deleted_at: None,
            synced_at: None,
        }
    }
}

/// Trait for remote record stores.
///
/// Errors follow one classification: timeouts, connection failures and
/// 5xx responses are [`crate::Error::TransientNetwork`]; a failed `If-Match`
/// precondition is [`crate::Error::VersionConflict`]; any other rejection is
/// [`crate::Error::Remote`].
pub trait RemoteStore: Send + Sync {
    /// Fetch a record. `Ok(None)` if the remote has never seen it.
    fn fetch(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<Option<RemoteRecord>>> + Send;

    /// Create a record the remote doesn't have yet.
    fn create(
        &self,
        record: &RemoteRecord,
    ) -> impl std::future::Future<Output = Result<RemoteRecord>> + Send;

    /// Replace a record, only if the remote still holds version `if_match`.
    fn update(
        &self,
        record: &RemoteRecord,
        if_match: i64,
    ) -> impl std::future::Future<Output = Result<RemoteRecord>> + Send;

    /// Delete a record. Deleting an absent record succeeds.
    fn delete(&self, id: &str) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Whether the remote answers its health probe.
    fn health(&self) -> impl std::future::Future<Output = bool> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClientData, LineItem, Operation};

    #[test]
    fn test_from_entry_uses_snapshot() {
        let payload = InvoicePayload::new(
            "INV-1",
            "2025-01-20",
            ClientData {
                name: "Acme".into(),
                address: String::new(),
            },
            vec![LineItem::new(1, "Widgets", 2, 50)],
        );
        let mut record = Record::new(payload.clone());
        record.payload.client.name = "Changed since".into();
        record.version = 3;

        let entry = QueueEntry {
            sequence: 1,
            record_id: record.id.clone(),
            operation: Operation::Update,
            payload,
            version: 2,
            retry_count: 0,
            last_error: None,
            enqueued_at: 42,
        };

        let wire = RemoteRecord::from_entry(&record, &entry);
        assert_eq!(wire.version, 2);
        assert_eq!(wire.payload.client.name, "Acme");
        assert!(wire.is_intact());

        let local = wire.to_record();
        assert_eq!(local.remote_version, 2);
        assert_eq!(local.modified_at, 42);
    }
}
