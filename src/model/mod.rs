//! Data models for invsync.
//!
//! - [`InvoicePayload`] - the business content of a record
//! - [`Record`] - payload plus sync metadata
//! - [`QueueEntry`] - one pending remote effect
//! - [`ConflictEntry`] - a divergence awaiting a decision

pub mod invoice;
pub mod record;

pub use invoice::{generate_invoice_number, ClientData, InvoicePayload, LineItem};
pub use record::{ConflictEntry, Operation, QueueEntry, Record, SyncStatus};
