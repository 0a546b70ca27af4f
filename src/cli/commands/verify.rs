//! Integrity check over the whole store.

use crate::error::{Error, Result};
use crate::sync::verify as verify_record;
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;

use super::open_storage;

#[derive(Serialize)]
struct Corrupted {
    id: String,
    invoice_number: String,
    expected: String,
    actual: String,
}

#[derive(Serialize)]
struct VerifyOutput {
    checked: usize,
    corrupted: Vec<Corrupted>,
}

/// Recompute every record's checksum.
///
/// # Errors
///
/// Returns [`Error::Integrity`] for the first corrupted record when any are
/// found, after all of them have been reported.
pub fn execute(db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let storage = open_storage(db_path)?;
    let records = storage.list_records(None, None)?;

    let mut corrupted = Vec::new();
    for record in &records {
        if let Err(Error::Integrity {
            id,
            expected,
            actual,
        }) = verify_record(record)
        {
            tracing::error!(record_id = %id, "Checksum mismatch");
            corrupted.push(Corrupted {
                id,
                invoice_number: record.payload.invoice_number.clone(),
                expected,
                actual,
            });
        }
    }

    if json {
        let output = VerifyOutput {
            checked: records.len(),
            corrupted,
        };
        println!("{}", serde_json::to_string(&output)?);
        return first_failure(output.corrupted);
    }

    if corrupted.is_empty() {
        println!(
            "{} {} record(s) checked, all intact",
            "✓".green(),
            records.len()
        );
        return Ok(());
    }

    for c in &corrupted {
        println!(
            "{} {} ({}): stored {} but content hashes to {}",
            "✗".red(),
            c.id,
            c.invoice_number,
            short_hash(&c.expected),
            short_hash(&c.actual)
        );
    }
    println!();
    println!(
        "{} of {} record(s) corrupted; they are excluded from sync.",
        corrupted.len(),
        records.len()
    );
    first_failure(corrupted)
}

fn first_failure(corrupted: Vec<Corrupted>) -> Result<()> {
    match corrupted.into_iter().next() {
        None => Ok(()),
        Some(c) => Err(Error::Integrity {
            id: c.id,
            expected: c.expected,
            actual: c.actual,
        }),
    }
}

fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClientData, InvoicePayload, LineItem, Record};
    use crate::storage::SqliteStorage;
    use tempfile::TempDir;

    fn store_with_one(dir: &TempDir) -> (PathBuf, String) {
        let db = dir.path().join("invsync.db");
        let mut storage = SqliteStorage::open(&db).unwrap();
        let payload = InvoicePayload::new(
            "INV-1",
            "2025-01-20",
            ClientData {
                name: "Acme".into(),
                address: String::new(),
            },
            vec![LineItem::new(1, "Widgets", 1, 10)],
        );
        let id = storage.put(&Record::new(payload), "test").unwrap().id;
        (db, id)
    }

    #[test]
    fn test_verify_clean_store() {
        let dir = TempDir::new().unwrap();
        let (db, _) = store_with_one(&dir);
        execute(Some(&db), true).unwrap();
    }

    #[test]
    fn test_verify_reports_tampered_row() {
        let dir = TempDir::new().unwrap();
        let (db, id) = store_with_one(&dir);
        {
            let storage = SqliteStorage::open(&db).unwrap();
            storage
                .conn()
                .execute(
                    "UPDATE records SET checksum = 'bogus' WHERE id = ?1",
                    [&id],
                )
                .unwrap();
        }

        let result = execute(Some(&db), true);
        assert!(matches!(result, Err(Error::Integrity { id: ref got, .. }) if *got == id));
    }
}
