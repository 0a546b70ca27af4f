//! Initialize the local invoice store.
//!
//! Creates the SQLite database (schema is applied on open) and, when none
//! exists yet, a config file holding the defaults so there is something to
//! edit.

use crate::config::{config_path, resolve_db_path, SyncConfig};
use crate::error::{Error, Result};
use crate::storage::SqliteStorage;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Serialize)]
struct InitOutput {
    database: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    config: Option<PathBuf>,
    config_created: bool,
}

/// Execute the init command.
///
/// # Errors
///
/// Returns [`Error::AlreadyInitialized`] if the database exists and `force`
/// is not set, or an error if the files cannot be created.
pub fn execute(
    db_path: Option<&PathBuf>,
    config_override: Option<&Path>,
    force: bool,
    json: bool,
) -> Result<()> {
    let db_path = resolve_db_path(db_path.map(PathBuf::as_path))
        .ok_or_else(|| Error::Config("Could not determine the database location".to_string()))?;

    if db_path.exists() {
        if !force {
            return Err(Error::AlreadyInitialized { path: db_path });
        }
        remove_database(&db_path)?;
    }

    if let Some(dir) = db_path.parent() {
        fs::create_dir_all(dir)?;
    }
    SqliteStorage::open(&db_path)?;
    tracing::info!(path = %db_path.display(), "Created database");

    let config = config_override.map(Path::to_path_buf).or_else(config_path);
    let config_created = match &config {
        Some(path) if !path.exists() => {
            SyncConfig::default().save(path)?;
            true
        }
        _ => false,
    };

    if json {
        let output = InitOutput {
            database: db_path,
            config,
            config_created,
        };
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!("Initialized invoice store");
        println!("  Database: {}", db_path.display());
        if let Some(path) = &config {
            let note = if config_created { " (created)" } else { "" };
            println!("  Config:   {}{note}", path.display());
        }
        println!();
        println!("Next: set remote_url and token in the config, then 'invsync sync run'.");
    }

    Ok(())
}

/// Remove a database together with its WAL side files.
fn remove_database(db_path: &Path) -> Result<()> {
    fs::remove_file(db_path)?;
    for suffix in ["-wal", "-shm"] {
        let mut side = db_path.as_os_str().to_owned();
        side.push(suffix);
        let side = PathBuf::from(side);
        if side.exists() {
            fs::remove_file(side)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_creates_database_and_config() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("data").join("invsync.db");
        let config = dir.path().join("config.json");

        execute(Some(&db), Some(&config), false, true).unwrap();

        assert!(db.exists());
        let loaded = SyncConfig::from_file(&config).unwrap();
        assert_eq!(loaded, SyncConfig::default());
    }

    #[test]
    fn test_init_fails_if_already_initialized() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("invsync.db");
        let config = dir.path().join("config.json");

        execute(Some(&db), Some(&config), false, true).unwrap();
        let result = execute(Some(&db), Some(&config), false, true);
        assert!(matches!(result, Err(Error::AlreadyInitialized { .. })));
    }

    #[test]
    fn test_force_recreates_empty_store() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("invsync.db");
        let config = dir.path().join("config.json");
        execute(Some(&db), Some(&config), false, true).unwrap();

        {
            let mut storage = SqliteStorage::open(&db).unwrap();
            let payload = crate::model::InvoicePayload::new(
                "INV-1",
                "2025-01-20",
                crate::model::ClientData {
                    name: "Acme".into(),
                    address: String::new(),
                },
                vec![crate::model::LineItem::new(1, "Widgets", 1, 10)],
            );
            storage
                .put(&crate::model::Record::new(payload), "test")
                .unwrap();
        }

        execute(Some(&db), Some(&config), true, true).unwrap();
        let storage = SqliteStorage::open(&db).unwrap();
        assert_eq!(storage.status_counts().unwrap().total(), 0);
    }
}
