//! Command implementations.

pub mod completions;
pub mod init;
pub mod invoice;
pub mod sync;
pub mod verify;
pub mod version;
pub mod watch;

use std::path::{Path, PathBuf};

use tokio::sync::watch as signal;

use crate::config::{default_actor, resolve_db_path, SyncConfig};
use crate::error::{Error, Result};
use crate::storage::SqliteStorage;

/// Open the store at the resolved database path.
///
/// Unlike [`SqliteStorage::open`], this refuses to create a new database:
/// that is `invsync init`'s job.
pub(crate) fn open_storage(db_path: Option<&PathBuf>) -> Result<SqliteStorage> {
    let db_path = resolve_db_path(db_path.map(PathBuf::as_path)).ok_or(Error::NotInitialized)?;
    if !db_path.exists() {
        return Err(Error::NotInitialized);
    }
    SqliteStorage::open(&db_path)
}

pub(crate) fn load_config(config_path: Option<&Path>) -> Result<SyncConfig> {
    SyncConfig::load(config_path)
}

pub(crate) fn actor_name(actor: Option<&str>) -> String {
    actor.map_or_else(default_actor, ToString::to_string)
}

/// Runtime for commands that talk to the remote.
pub(crate) fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::Other(format!("failed to start async runtime: {e}")))
}

/// Shutdown channel flipped by Ctrl-C.
///
/// Must be called from inside the runtime.
pub(crate) fn shutdown_on_ctrl_c() -> signal::Receiver<bool> {
    let (tx, rx) = signal::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, finishing in-flight work");
            let _ = tx.send(true);
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_storage_requires_existing_db() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.db");
        assert!(matches!(
            open_storage(Some(&missing)),
            Err(Error::NotInitialized)
        ));
        assert!(!missing.exists());
    }

    #[test]
    fn test_actor_name_prefers_explicit() {
        assert_eq!(actor_name(Some("alice")), "alice");
    }
}
