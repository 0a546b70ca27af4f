//! Invoice command implementations.

use crate::cli::{InvoiceCommands, InvoiceCreateArgs, InvoiceUpdateArgs, LineItemArg};
use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::model::{ClientData, InvoicePayload, LineItem, Record, SyncStatus};
use crate::storage::{DeleteOutcome, Event};
use crate::sync::{admit, compute_checksum, has_changed, occ, DuplicateDetector};
use crate::validate::normalize_sync_status;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::{actor_name, load_config, open_storage};

/// Payload as read from a JSON file.
///
/// Line keys and the total are optional. A line without a key takes the key
/// of the line with the same number in the payload being replaced, so that
/// reading the same file twice yields the same checksum; lines with no
/// counterpart get a fresh key. A missing total is computed. A total that is
/// given is kept as-is so that a wrong one is caught by validation.
#[derive(Debug, Deserialize)]
struct PayloadInput {
    #[serde(default)]
    invoice_number: Option<String>,
    #[serde(default)]
    invoice_date: Option<String>,
    client: ClientData,
    line_items: Vec<LineItemInput>,
    #[serde(default)]
    total_amount: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct LineItemInput {
    #[serde(default)]
    key: Option<String>,
    description: String,
    amount: i64,
    price: i64,
}

impl PayloadInput {
    fn into_payload(self, prefix: &str, base: Option<&InvoicePayload>) -> InvoicePayload {
        let (default_number, default_date) = match base {
            Some(base) => (base.invoice_number.clone(), base.invoice_date.clone()),
            None => {
                let draft = InvoicePayload::draft(prefix);
                (draft.invoice_number, draft.invoice_date)
            }
        };

        let line_items = self
            .line_items
            .into_iter()
            .enumerate()
            .map(|(i, line)| {
                let number = u32::try_from(i + 1).unwrap_or(u32::MAX);
                let mut item = LineItem::new(number, line.description, line.amount, line.price);
                let inherited = base.and_then(|base| {
                    base.line_items
                        .iter()
                        .find(|existing| existing.number == number)
                        .map(|existing| existing.key.clone())
                });
                if let Some(key) = line.key.or(inherited) {
                    item.key = key;
                }
                item
            })
            .collect();

        let mut payload = InvoicePayload::new(
            self.invoice_number.unwrap_or(default_number),
            self.invoice_date.unwrap_or(default_date),
            self.client,
            line_items,
        );
        if let Some(total) = self.total_amount {
            payload.total_amount = total;
        }
        payload
    }
}

/// Read an invoice payload from a JSON file.
///
/// `base` is the payload the file replaces, if any; it supplies line keys and
/// header defaults the file leaves out.
pub(crate) fn read_payload_file(
    path: &Path,
    prefix: &str,
    base: Option<&InvoicePayload>,
) -> Result<InvoicePayload> {
    let text = std::fs::read_to_string(path)?;
    let input: PayloadInput = serde_json::from_str(&text).map_err(|e| {
        Error::InvalidArgument(format!("invalid payload in {}: {e}", path.display()))
    })?;
    Ok(input.into_payload(prefix, base))
}

#[derive(Serialize)]
struct CreateOutput<'a> {
    id: &'a str,
    invoice_number: &'a str,
    total_amount: i64,
    version: i64,
    sync_status: SyncStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    possible_duplicate_of: Option<&'a str>,
}

#[derive(Serialize)]
struct ShowOutput<'a> {
    #[serde(flatten)]
    record: &'a Record,
    #[serde(skip_serializing_if = "Option::is_none")]
    events: Option<Vec<Event>>,
}

#[derive(Serialize)]
struct ListOutput {
    records: Vec<Record>,
    count: usize,
}

#[derive(Serialize)]
struct DeleteOutput<'a> {
    id: &'a str,
    outcome: &'a str,
}

/// Execute invoice commands.
///
/// # Errors
///
/// Returns an error if the store is not initialized or the operation fails.
pub fn execute(
    command: &InvoiceCommands,
    db_path: Option<&PathBuf>,
    config_path: Option<&Path>,
    actor: Option<&str>,
    json: bool,
) -> Result<()> {
    match command {
        InvoiceCommands::Create(args) => create(args, db_path, config_path, actor, json),
        InvoiceCommands::Update(args) => update(args, db_path, config_path, actor, json),
        InvoiceCommands::Show { id, events } => show(id, *events, db_path, json),
        InvoiceCommands::List { status, limit } => list(status.as_deref(), *limit, db_path, json),
        InvoiceCommands::Delete { id } => delete(id, db_path, actor, json),
    }
}

fn create(
    args: &InvoiceCreateArgs,
    db_path: Option<&PathBuf>,
    config_path: Option<&Path>,
    actor: Option<&str>,
    json: bool,
) -> Result<()> {
    let config = load_config(config_path)?;
    let mut storage = open_storage(db_path)?;
    let actor = actor_name(actor);

    let payload = match &args.file {
        Some(path) => read_payload_file(path, &config.invoice_prefix, None)?,
        None => payload_from_args(args, &config),
    };

    let detector = DuplicateDetector::new(config.duplicates);
    let admission = admit(&mut storage, &detector, &Record::new(payload), &actor)?;
    let record = &admission.record;

    if json {
        let output = CreateOutput {
            id: &record.id,
            invoice_number: &record.payload.invoice_number,
            total_amount: record.payload.total_amount,
            version: record.version,
            sync_status: record.sync_status,
            possible_duplicate_of: admission.flagged.as_ref().map(|v| v.existing_id.as_str()),
        };
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!(
            "Created invoice {} [{}]",
            record.payload.invoice_number,
            record.short_id()
        );
        println!("  Total:  {}", record.payload.total_amount);
        println!("  Status: {}", record.sync_status);
        if let Some(verdict) = &admission.flagged {
            println!(
                "  {} resembles {} (score {:.2})",
                "Possible duplicate:".yellow(),
                verdict.existing_id,
                verdict.score
            );
        }
    }

    Ok(())
}

fn payload_from_args(args: &InvoiceCreateArgs, config: &SyncConfig) -> InvoicePayload {
    let mut payload = InvoicePayload::draft(&config.invoice_prefix);
    if let Some(number) = &args.number {
        payload.invoice_number.clone_from(number);
    }
    if let Some(date) = &args.date {
        payload.invoice_date.clone_from(date);
    }
    payload.client = ClientData {
        name: args.client.clone().unwrap_or_default(),
        address: args.address.clone().unwrap_or_default(),
    };
    if !args.items.is_empty() {
        payload.line_items.clear();
        for item in &args.items {
            payload.add_line_item(item.description.clone(), item.amount, item.price);
        }
    }
    payload
}

fn update(
    args: &InvoiceUpdateArgs,
    db_path: Option<&PathBuf>,
    config_path: Option<&Path>,
    actor: Option<&str>,
    json: bool,
) -> Result<()> {
    let config = load_config(config_path)?;
    let mut storage = open_storage(db_path)?;
    let actor = actor_name(actor);

    let id = storage.resolve_id(&args.id)?;
    let current = storage.get_required(&id)?;
    let expected = args.expect_version.unwrap_or(current.version);

    let payload = match &args.file {
        Some(path) => read_payload_file(path, &config.invoice_prefix, Some(&current.payload))?,
        None => apply_edits(current.payload.clone(), args)?,
    };

    if !has_changed(&compute_checksum(&payload), Some(&current.checksum)) {
        if json {
            println!("{}", serde_json::to_string(&current)?);
        } else {
            println!("No changes to {}", current.payload.invoice_number);
        }
        return Ok(());
    }

    let updated = occ::update_local(&mut storage, &id, &payload, expected, &actor)?;

    if json {
        println!("{}", serde_json::to_string(&updated)?);
    } else {
        println!(
            "Updated invoice {} [{}] to version {}",
            updated.payload.invoice_number,
            updated.short_id(),
            updated.version
        );
        println!("  Total:  {}", updated.payload.total_amount);
        println!("  Status: {}", updated.sync_status);
    }

    Ok(())
}

fn apply_edits(mut payload: InvoicePayload, args: &InvoiceUpdateArgs) -> Result<InvoicePayload> {
    if let Some(number) = &args.number {
        payload.invoice_number.clone_from(number);
    }
    if let Some(date) = &args.date {
        payload.invoice_date.clone_from(date);
    }
    if let Some(name) = &args.client {
        payload.client.name.clone_from(name);
    }
    if let Some(address) = &args.address {
        payload.client.address.clone_from(address);
    }

    // Highest number first so earlier removals don't shift later ones
    let mut removals = args.remove_items.clone();
    removals.sort_unstable_by(|a, b| b.cmp(a));
    removals.dedup();
    for number in removals {
        let index = payload
            .line_items
            .iter()
            .position(|item| item.number == number)
            .ok_or_else(|| Error::InvalidArgument(format!("no line item number {number}")))?;
        if !payload.remove_line_item(index) {
            return Err(Error::InvalidArgument(
                "an invoice must keep at least one line item".to_string(),
            ));
        }
    }

    for LineItemArg {
        description,
        amount,
        price,
    } in &args.add_items
    {
        payload.add_line_item(description.clone(), *amount, *price);
    }

    payload.recompute_total();
    Ok(payload)
}

fn show(id: &str, with_events: bool, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let storage = open_storage(db_path)?;
    let id = storage.resolve_id(id)?;
    let record = storage.get_required(&id)?;
    let events = if with_events {
        Some(storage.events_for(&id, None)?)
    } else {
        None
    };

    if json {
        let output = ShowOutput {
            record: &record,
            events,
        };
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    print_record(&record);
    if let Some(events) = events {
        println!();
        println!("{}", "History:".bold());
        for event in &events {
            let when = chrono::DateTime::from_timestamp_millis(event.created_at)
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default();
            let detail = event
                .comment
                .as_deref()
                .or(event.new_value.as_deref())
                .unwrap_or("");
            println!(
                "  {when}  {:<18} {:<12} {detail}",
                event.event_type.as_str(),
                event.actor
            );
        }
    }

    Ok(())
}

fn print_record(record: &Record) {
    let payload = &record.payload;
    println!("[{}] {}", record.short_id(), payload.invoice_number.bold());
    println!();
    println!("Date:     {}", payload.invoice_date);
    println!("Client:   {}", payload.client.name);
    if !payload.client.address.is_empty() {
        println!("Address:  {}", payload.client.address);
    }
    println!("Status:   {}", colored_status(record.sync_status));
    println!(
        "Version:  {} (remote {})",
        record.version, record.remote_version
    );
    if record.is_deleted() {
        println!("Deleted:  {}", "yes, remote delete pending".red());
    }
    if let Some(error) = &record.last_error {
        println!("Error:    {}", error.red());
    }

    println!();
    println!("  {:>3}  {:<32} {:>5} {:>12} {:>12}", "#", "Description", "Qty", "Price", "Subtotal");
    for item in &payload.line_items {
        println!(
            "  {:>3}  {:<32} {:>5} {:>12} {:>12}",
            item.number,
            truncate(&item.description, 32),
            item.amount,
            item.price,
            item.subtotal()
        );
    }
    println!("  {:>69}", format!("Total: {}", payload.total_amount));
}

fn list(status: Option<&str>, limit: u32, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let storage = open_storage(db_path)?;
    let status = status.map(normalize_sync_status).transpose()?;
    let records = storage.list_records(status, Some(limit))?;

    if json {
        let output = ListOutput {
            count: records.len(),
            records,
        };
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No invoices found.");
        return Ok(());
    }

    println!(
        "{:<10} {:<18} {:<24} {:>12} {:>4}  {}",
        "ID", "Number", "Client", "Total", "Ver", "Status"
    );
    for record in &records {
        let status = if record.is_deleted() {
            format!("{} (deleting)", colored_status(record.sync_status))
        } else {
            colored_status(record.sync_status).to_string()
        };
        println!(
            "{:<10} {:<18} {:<24} {:>12} {:>4}  {status}",
            record.short_id(),
            truncate(&record.payload.invoice_number, 18),
            truncate(&record.payload.client.name, 24),
            record.payload.total_amount,
            record.version,
        );
    }
    println!();
    println!("{} invoice(s)", records.len());

    Ok(())
}

fn delete(id: &str, db_path: Option<&PathBuf>, actor: Option<&str>, json: bool) -> Result<()> {
    let mut storage = open_storage(db_path)?;
    let actor = actor_name(actor);
    let id = storage.resolve_id(id)?;

    let outcome = match storage.delete(&id, &actor)? {
        DeleteOutcome::Purged => "purged",
        DeleteOutcome::Queued => "queued",
    };

    if json {
        println!("{}", serde_json::to_string(&DeleteOutput { id: &id, outcome })?);
    } else if outcome == "purged" {
        println!("Deleted {id} (it had never been synced)");
    } else {
        println!("Deleted {id}; the remote copy will be removed on the next sync");
    }

    Ok(())
}

fn colored_status(status: SyncStatus) -> colored::ColoredString {
    let text = status.as_str();
    match status {
        SyncStatus::Synced => text.green(),
        SyncStatus::Pending => text.yellow(),
        SyncStatus::Syncing => text.cyan(),
        SyncStatus::Conflict => text.magenta(),
        SyncStatus::Error => text.red(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn update_args(id: &str) -> InvoiceUpdateArgs {
        InvoiceUpdateArgs {
            id: id.to_string(),
            expect_version: None,
            number: None,
            date: None,
            client: None,
            address: None,
            add_items: Vec::new(),
            remove_items: Vec::new(),
            file: None,
        }
    }

    fn sample() -> InvoicePayload {
        InvoicePayload::new(
            "INV-1",
            "2025-01-20",
            ClientData {
                name: "Acme".into(),
                address: String::new(),
            },
            vec![
                LineItem::new(1, "Widgets", 2, 10),
                LineItem::new(2, "Gadgets", 1, 5),
                LineItem::new(3, "Bolts", 10, 1),
            ],
        )
    }

    #[test]
    fn test_apply_edits_removes_and_adds_lines() {
        let mut args = update_args("x");
        args.remove_items = vec![1, 3];
        args.add_items = vec![LineItemArg {
            description: "Nuts".into(),
            amount: 4,
            price: 2,
        }];
        args.client = Some("Acme Corp".into());

        let payload = apply_edits(sample(), &args).unwrap();
        let descriptions: Vec<_> = payload
            .line_items
            .iter()
            .map(|i| (i.number, i.description.as_str()))
            .collect();
        assert_eq!(descriptions, vec![(1, "Gadgets"), (2, "Nuts")]);
        assert_eq!(payload.total_amount, 5 + 8);
        assert_eq!(payload.client.name, "Acme Corp");
    }

    #[test]
    fn test_apply_edits_rejects_unknown_or_last_line() {
        let mut args = update_args("x");
        args.remove_items = vec![9];
        assert!(matches!(
            apply_edits(sample(), &args),
            Err(Error::InvalidArgument(_))
        ));

        args.remove_items = vec![1, 2, 3];
        assert!(matches!(
            apply_edits(sample(), &args),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_read_payload_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("invoice.json");
        std::fs::write(
            &path,
            r#"{
                "client": {"name": "Acme"},
                "line_items": [
                    {"description": "Widgets", "amount": 3, "price": 100},
                    {"key": "fixed-key", "description": "Setup", "amount": 1, "price": 50}
                ]
            }"#,
        )
        .unwrap();

        let payload = read_payload_file(&path, "INV", None).unwrap();
        assert!(payload.invoice_number.starts_with("INV-"));
        assert_eq!(payload.total_amount, 350);
        assert_eq!(payload.line_items[1].key, "fixed-key");
        assert_eq!(payload.line_items[1].number, 2);
        crate::validate::validate_invoice(&payload).unwrap();
    }

    #[test]
    fn test_read_payload_file_keeps_given_total() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("invoice.json");
        std::fs::write(
            &path,
            r#"{"invoice_number": "INV-7", "invoice_date": "2025-02-01",
                "client": {"name": "Acme"},
                "line_items": [{"description": "Widgets", "amount": 1, "price": 10}],
                "total_amount": 99}"#,
        )
        .unwrap();

        let payload = read_payload_file(&path, "INV", None).unwrap();
        assert_eq!(payload.total_amount, 99);
        assert!(matches!(
            crate::validate::validate_invoice(&payload),
            Err(Error::Validation(_))
        ));
    }

    fn write_keyless_file(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("edit.json");
        std::fs::write(
            &path,
            r#"{
                "client": {"name": "Acme Corp"},
                "line_items": [
                    {"description": "Widgets", "amount": 2, "price": 10},
                    {"description": "Gadgets", "amount": 1, "price": 5},
                    {"description": "Bolts", "amount": 10, "price": 1}
                ]
            }"#,
        )
        .unwrap();
        path
    }

    #[test]
    fn test_read_payload_file_inherits_keys_from_base() {
        let dir = TempDir::new().unwrap();
        let path = write_keyless_file(&dir);
        let base = sample();

        let first = read_payload_file(&path, "INV", Some(&base)).unwrap();
        let second = read_payload_file(&path, "INV", Some(&base)).unwrap();
        assert_eq!(compute_checksum(&first), compute_checksum(&second));
        assert_eq!(first.invoice_number, base.invoice_number);
        assert_eq!(first.invoice_date, base.invoice_date);

        let keys: Vec<_> = first.line_items.iter().map(|i| i.key.as_str()).collect();
        let base_keys: Vec<_> = base.line_items.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, base_keys);
    }

    #[test]
    fn test_file_edit_merges_without_duplicating_lines() {
        use crate::sync::{resolve_at, Resolution, ResolutionStrategy, TieBreak};

        let dir = TempDir::new().unwrap();
        let path = write_keyless_file(&dir);
        let base = Record::new(sample());

        let mut local = base.clone();
        local.payload = read_payload_file(&path, "INV", Some(&base.payload)).unwrap();
        local.version = 2;
        let mut remote = base.clone();
        remote.version = 3;

        match resolve_at(&local, &remote, ResolutionStrategy::FieldMerge, TieBreak::default(), 0) {
            Resolution::Resolved(merged) => {
                assert_eq!(merged.payload.line_items.len(), 3);
                assert_eq!(merged.payload.total_amount, sample().total_amount);
            }
            Resolution::Deferred => panic!("field merge never defers"),
        }
    }

    #[test]
    fn test_update_from_same_file_twice_is_noop() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("invsync.db");
        let config = dir.path().join("config.json");
        let id = {
            let mut storage = crate::storage::SqliteStorage::open(&db).unwrap();
            storage.put(&Record::new(sample()), "test").unwrap().id
        };

        let mut args = update_args(&id);
        args.file = Some(write_keyless_file(&dir));

        update(&args, Some(&db), Some(&config), Some("test"), true).unwrap();
        let storage = crate::storage::SqliteStorage::open(&db).unwrap();
        let once = storage.get_required(&id).unwrap();
        assert_eq!(once.version, 2);
        assert_eq!(once.payload.client.name, "Acme Corp");
        drop(storage);

        update(&args, Some(&db), Some(&config), Some("test"), true).unwrap();
        let storage = crate::storage::SqliteStorage::open(&db).unwrap();
        let twice = storage.get_required(&id).unwrap();
        assert_eq!(twice.version, 2);
        assert_eq!(twice.checksum, once.checksum);
        assert_eq!(storage.queue_for(&id).unwrap().len(), 2);
    }

    #[test]
    fn test_create_args_without_items_fail_validation() {
        let args = InvoiceCreateArgs {
            number: Some("INV-9".into()),
            date: None,
            client: Some("Acme".into()),
            address: None,
            items: Vec::new(),
            file: None,
        };
        let payload = payload_from_args(&args, &SyncConfig::default());
        assert_eq!(payload.invoice_number, "INV-9");
        // The draft's blank line is kept and rejected
        assert!(matches!(
            crate::validate::validate_invoice(&payload),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a long description", 6), "a lon…");
    }
}
