//! Sync command implementations.
//!
//! `sync run` performs one sweep of the queue against the configured remote
//! and exits; `invsync watch` keeps doing so in the background. The other
//! subcommands only touch the local store.

use crate::cli::{Side, SyncCommands};
use crate::error::{Error, Result};
use crate::model::ConflictEntry;
use crate::remote::HttpRemote;
use crate::sync::{get_sync_status, print_status, RecordOutcome, SweepReport, SyncEngine};
use colored::Colorize;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::invoice::read_payload_file;
use super::{actor_name, load_config, open_storage, runtime, shutdown_on_ctrl_c};

#[derive(Serialize)]
struct ConflictListOutput<'a> {
    conflicts: &'a [ConflictEntry],
    count: usize,
}

/// Execute sync commands.
///
/// # Errors
///
/// Returns an error if the store is not initialized, the remote is not
/// configured (for `run`) or the operation fails.
pub fn execute(
    command: &SyncCommands,
    db_path: Option<&PathBuf>,
    config_path: Option<&Path>,
    actor: Option<&str>,
    json: bool,
) -> Result<()> {
    match command {
        SyncCommands::Run => run(db_path, config_path, actor, json),
        SyncCommands::Status => status(db_path, config_path, json),
        SyncCommands::Requeue { id } => requeue(id, db_path, actor, json),
        SyncCommands::Resolve { id, take, file } => resolve(
            id,
            *take,
            file.as_deref(),
            db_path,
            config_path,
            actor,
            json,
        ),
        SyncCommands::Conflicts { all } => conflicts(*all, db_path, json),
    }
}

fn run(
    db_path: Option<&PathBuf>,
    config_path: Option<&Path>,
    actor: Option<&str>,
    json: bool,
) -> Result<()> {
    let config = Arc::new(load_config(config_path)?);
    let storage = open_storage(db_path)?;
    let actor = actor_name(actor);

    let remote = Arc::new(HttpRemote::from_config(&config, &actor)?);
    tracing::debug!(remote = %remote.base_url(), "Using HTTP remote");
    let engine = Arc::new(SyncEngine::new(
        Arc::new(Mutex::new(storage)),
        remote,
        config,
        &actor,
    )?);

    let report = runtime()?.block_on(async {
        let shutdown = shutdown_on_ctrl_c();
        engine.recover()?;
        engine.sweep(shutdown).await
    })?;

    if json {
        println!("{}", serde_json::to_string(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &SweepReport) {
    if report.is_empty() {
        println!("Nothing to sync.");
        return;
    }

    println!("{}", "Sync complete".bold());
    println!("  Synced:        {}", report.synced().to_string().green());
    if report.auto_resolved() > 0 {
        println!("  Auto-resolved: {}", report.auto_resolved());
    }
    if report.conflicts() > 0 {
        println!("  Conflicts:     {}", report.conflicts().to_string().magenta());
    }
    if report.failed() > 0 {
        println!("  Failed:        {}", report.failed().to_string().red());
    }

    for record in &report.records {
        match &record.outcome {
            RecordOutcome::Failed { reason } => {
                println!("    {} {}: {reason}", "✗".red(), record.record_id);
            }
            RecordOutcome::Conflict => {
                println!(
                    "    {} {}: needs 'invsync sync resolve'",
                    "!".magenta(),
                    record.record_id
                );
            }
            RecordOutcome::Synced | RecordOutcome::Cancelled | RecordOutcome::Skipped => {}
        }
    }

    if report.cancelled {
        println!();
        println!(
            "{}",
            "Interrupted; remaining changes stay queued for the next run.".yellow()
        );
    }
}

fn status(db_path: Option<&PathBuf>, config_path: Option<&Path>, json: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let storage = open_storage(db_path)?;
    let sync_status = get_sync_status(&storage, &config)?;

    if json {
        println!("{}", serde_json::to_string(&sync_status)?);
    } else {
        print_status(&sync_status);
    }
    Ok(())
}

fn requeue(id: &str, db_path: Option<&PathBuf>, actor: Option<&str>, json: bool) -> Result<()> {
    let mut storage = open_storage(db_path)?;
    let actor = actor_name(actor);
    let id = storage.resolve_id(id)?;

    storage.requeue(&id, &actor)?;

    if json {
        let record = storage.get_required(&id)?;
        println!("{}", serde_json::to_string(&record)?);
    } else {
        println!("Requeued {id}; it will be retried on the next sync");
    }
    Ok(())
}

fn resolve(
    id: &str,
    take: Option<Side>,
    file: Option<&Path>,
    db_path: Option<&PathBuf>,
    config_path: Option<&Path>,
    actor: Option<&str>,
    json: bool,
) -> Result<()> {
    let mut storage = open_storage(db_path)?;
    let actor = actor_name(actor);
    let id = storage.resolve_id(id)?;

    let conflict = storage
        .open_conflict(&id)?
        .ok_or_else(|| Error::InvalidArgument(format!("record {id} has no open conflict")))?;

    let payload = match (take, file) {
        (_, Some(path)) => {
            let config = load_config(config_path)?;
            read_payload_file(path, &config.invoice_prefix, Some(&conflict.local_payload))?
        }
        (Some(Side::Local), None) => conflict.local_payload,
        (Some(Side::Remote), None) => conflict.remote_payload,
        (None, None) => {
            return Err(Error::InvalidArgument(
                "choose --take local|remote or --file".to_string(),
            ));
        }
    };

    let record = storage.resolve_conflict(&id, &payload, &actor)?;

    if json {
        println!("{}", serde_json::to_string(&record)?);
    } else {
        println!(
            "Resolved {} at version {}; it will be pushed on the next sync",
            record.short_id(),
            record.version
        );
    }
    Ok(())
}

fn conflicts(all: bool, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let storage = open_storage(db_path)?;
    let conflicts = storage.list_conflicts(all)?;

    if json {
        let output = ConflictListOutput {
            conflicts: &conflicts,
            count: conflicts.len(),
        };
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No conflicts.");
        return Ok(());
    }

    for conflict in &conflicts {
        let state = if conflict.resolved_at.is_some() {
            "resolved".green()
        } else {
            "open".magenta()
        };
        println!(
            "{} [{}] local v{} vs remote v{} ({})",
            conflict.record_id,
            state,
            conflict.local_version,
            conflict.remote_version,
            conflict.strategy
        );
        print_diff(conflict);
    }
    Ok(())
}

/// Show which payload fields differ between the two sides.
fn print_diff(conflict: &ConflictEntry) {
    let local = &conflict.local_payload;
    let remote = &conflict.remote_payload;

    let row = |field: &str, l: String, r: String| {
        if l != r {
            println!("    {field:<14} local: {l:<24} remote: {r}");
        }
    };
    row(
        "invoice_number",
        local.invoice_number.clone(),
        remote.invoice_number.clone(),
    );
    row(
        "invoice_date",
        local.invoice_date.clone(),
        remote.invoice_date.clone(),
    );
    row("client", local.client.name.clone(), remote.client.name.clone());
    row(
        "address",
        local.client.address.clone(),
        remote.client.address.clone(),
    );
    row(
        "line_items",
        local.line_items.len().to_string(),
        remote.line_items.len().to_string(),
    );
    row(
        "total_amount",
        local.total_amount.to_string(),
        remote.total_amount.to_string(),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClientData, InvoicePayload, LineItem, Record, SyncStatus};
    use crate::storage::SqliteStorage;
    use tempfile::TempDir;

    fn payload(client: &str) -> InvoicePayload {
        InvoicePayload::new(
            "INV-1",
            "2025-01-20",
            ClientData {
                name: client.into(),
                address: String::new(),
            },
            vec![LineItem::new(1, "Widgets", 1, 10)],
        )
    }

    fn conflicted_store(dir: &TempDir) -> (PathBuf, String) {
        let db = dir.path().join("invsync.db");
        let mut storage = SqliteStorage::open(&db).unwrap();
        let record = storage.put(&Record::new(payload("Local Co")), "test").unwrap();

        let conflict = ConflictEntry {
            id: 0,
            record_id: record.id.clone(),
            local_version: record.version,
            remote_version: 4,
            local_payload: record.payload.clone(),
            remote_payload: payload("Remote Co"),
            remote_modified_at: record.modified_at,
            strategy: "manual".into(),
            detected_at: record.modified_at,
            resolved_at: None,
        };
        storage.mark_conflict(&conflict, "test").unwrap();
        (db, record.id)
    }

    #[test]
    fn test_resolve_takes_remote_side() {
        let dir = TempDir::new().unwrap();
        let (db, id) = conflicted_store(&dir);
        let config = dir.path().join("config.json");

        resolve(&id, Some(Side::Remote), None, Some(&db), Some(&config), Some("test"), true)
            .unwrap();

        let storage = SqliteStorage::open(&db).unwrap();
        let record = storage.get_required(&id).unwrap();
        assert_eq!(record.payload.client.name, "Remote Co");
        assert_eq!(record.sync_status, SyncStatus::Pending);
        assert_eq!(record.version, 5);
        assert!(storage.open_conflict(&id).unwrap().is_none());
    }

    #[test]
    fn test_resolve_without_open_conflict_fails() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("invsync.db");
        let id = {
            let mut storage = SqliteStorage::open(&db).unwrap();
            storage.put(&Record::new(payload("Acme")), "test").unwrap().id
        };

        let result = resolve(&id, Some(Side::Local), None, Some(&db), None, Some("test"), true);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_run_without_remote_is_config_error() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("invsync.db");
        SqliteStorage::open(&db).unwrap();
        let config = dir.path().join("config.json");
        crate::config::SyncConfig::default().save(&config).unwrap();

        let result = run(Some(&db), Some(&config), Some("test"), true);
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
