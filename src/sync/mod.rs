//! Offline-first synchronization.
//!
//! Local writes land in SQLite together with a queue entry; the engine later
//! replays the queue against the remote record store.
//!
//! - **Hashing**: canonical SHA256 checksums for integrity and idempotency
//! - **Resolver**: reconciles diverged local and remote copies
//! - **OCC**: version-checked writes
//! - **Duplicates**: screens new invoices against existing ones
//! - **Engine**: batched, retrying, cancellable queue replay
//! - **Monitor / Agent**: connectivity probing and the background loop
//!
//! # Example
//!
//! ```ignore
//! use invsync::sync::{SyncEngine, SyncAgent};
//!
//! let engine = Arc::new(SyncEngine::new(storage, remote, config, "agent")?);
//! engine.recover()?;
//! let report = engine.sweep(shutdown_rx).await?;
//! println!("{} synced, {} conflicts", report.synced(), report.conflicts());
//! ```

mod agent;
mod duplicate;
mod engine;
mod hash;
mod monitor;
pub mod occ;
mod resolver;
mod status;
mod types;

pub use agent::SyncAgent;
pub use duplicate::{admit, Admission, DuplicateAction, DuplicateDetector, DuplicateVerdict};
pub use engine::SyncEngine;
pub use hash::{canonical_json, compute_checksum, content_hash, has_changed, verify};
pub use monitor::{ConnectionMonitor, ConnectionState};
pub use resolver::{resolve_at, ConflictResolver, Resolution};
pub use status::{get_sync_status, print_status};
pub use types::{
    RecordOutcome, RecordReport, ResolutionStrategy, SweepReport, SyncStatusReport, TieBreak,
};
