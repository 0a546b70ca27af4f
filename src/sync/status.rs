//! Sync status display.
//!
//! Summarizes the local store from the sync engine's point of view: how many
//! records sit in each state, how deep the queue is and how long the oldest
//! entry has been waiting.

use colored::Colorize;

use crate::config::SyncConfig;
use crate::error::Result;
use crate::storage::SqliteStorage;
use crate::sync::types::SyncStatusReport;

/// Gather the current sync status.
///
/// # Errors
///
/// Returns an error if a query fails or the configured strategy is invalid.
pub fn get_sync_status(storage: &SqliteStorage, config: &SyncConfig) -> Result<SyncStatusReport> {
    Ok(SyncStatusReport {
        counts: storage.status_counts()?,
        queue_depth: storage.queue_len()?,
        open_conflicts: storage.list_conflicts(false)?.len(),
        oldest_pending_at: storage.oldest_enqueued_at()?,
        remote_url: config.remote_url.clone(),
        strategy: config.resolution_strategy()?,
    })
}

/// Print sync status to stdout in a human-readable format.
pub fn print_status(status: &SyncStatusReport) {
    println!("{}", "Sync Status".bold().underline());
    println!();

    match &status.remote_url {
        Some(url) => println!("  Remote:    {url}"),
        None => println!("  Remote:    {}", "not configured".dimmed()),
    }
    println!("  Strategy:  {}", status.strategy);
    println!();

    let counts = &status.counts;
    if counts.total() == 0 {
        println!("{}", "No records stored.".dimmed());
        return;
    }

    println!("{}", "Records:".blue().bold());
    println!("  Synced:    {}", counts.synced.to_string().green());
    if counts.pending > 0 {
        println!("  Pending:   {}", counts.pending.to_string().yellow());
    }
    if counts.syncing > 0 {
        println!("  Syncing:   {}", counts.syncing.to_string().cyan());
    }
    if counts.conflict > 0 {
        println!("  Conflict:  {}", counts.conflict.to_string().magenta());
    }
    if counts.error > 0 {
        println!("  Error:     {}", counts.error.to_string().red());
    }
    println!("  {}:     {}", "Total".bold(), counts.total());
    println!();

    if status.queue_depth > 0 {
        println!("{}", "Queue:".yellow().bold());
        println!("  Entries:   {}", status.queue_depth);
        if let Some(oldest) = status.oldest_pending_at {
            let age = chrono::Utc::now().timestamp_millis() - oldest;
            println!("  Oldest:    {} ago", format_age(age));
        }
        println!();
        println!("{}", "Run 'invsync sync run' to push pending changes.".dimmed());
    } else {
        println!("{}", "Nothing waiting to sync.".green());
    }

    if status.open_conflicts > 0 {
        println!();
        println!(
            "{} {} awaiting a decision. See 'invsync sync conflicts'.",
            "Conflicts:".magenta().bold(),
            status.open_conflicts
        );
    }
    if counts.error > 0 {
        println!(
            "{}",
            "Records in ERROR need 'invsync sync requeue <id>' once the cause is fixed.".dimmed()
        );
    }
}

/// Format a duration in milliseconds as a short human-readable age.
fn format_age(millis: i64) -> String {
    let secs = millis.max(0) / 1000;
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3_600 {
        format!("{}m", secs / 60)
    } else if secs < 86_400 {
        format!("{}h {}m", secs / 3_600, (secs % 3_600) / 60)
    } else {
        format!("{}d", secs / 86_400)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClientData, InvoicePayload, LineItem, Record};

    #[test]
    fn test_format_age() {
        assert_eq!(format_age(-5), "0s");
        assert_eq!(format_age(42_000), "42s");
        assert_eq!(format_age(125_000), "2m");
        assert_eq!(format_age(3_900_000), "1h 5m");
        assert_eq!(format_age(2 * 86_400_000), "2d");
    }

    #[test]
    fn test_status_counts_queue() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let config = SyncConfig::default();

        let empty = get_sync_status(&storage, &config).unwrap();
        assert_eq!(empty.counts.total(), 0);
        assert_eq!(empty.queue_depth, 0);
        assert!(empty.oldest_pending_at.is_none());

        let payload = InvoicePayload::new(
            "INV-1",
            "2025-01-20",
            ClientData {
                name: "Acme".into(),
                address: String::new(),
            },
            vec![LineItem::new(1, "Widgets", 1, 10)],
        );
        storage.put(&Record::new(payload), "test").unwrap();

        let status = get_sync_status(&storage, &config).unwrap();
        assert_eq!(status.counts.pending, 1);
        assert_eq!(status.queue_depth, 1);
        assert_eq!(status.open_conflicts, 0);
        assert!(status.oldest_pending_at.is_some());
    }
}
