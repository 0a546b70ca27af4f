//! Background sync: run the agent until Ctrl-C.

use crate::error::Result;
use crate::remote::HttpRemote;
use crate::sync::{SyncAgent, SyncEngine};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::{actor_name, load_config, open_storage, runtime, shutdown_on_ctrl_c};

/// Execute the watch command.
///
/// Connectivity changes are printed as they happen, one JSON object per line
/// in JSON mode.
///
/// # Errors
///
/// Returns an error if the store or remote is not set up, or if recovering
/// in-flight records fails on startup.
pub fn execute(
    db_path: Option<&PathBuf>,
    config_path: Option<&Path>,
    actor: Option<&str>,
    json: bool,
) -> Result<()> {
    let config = Arc::new(load_config(config_path)?);
    let storage = open_storage(db_path)?;
    let actor = actor_name(actor);

    let remote = Arc::new(HttpRemote::from_config(&config, &actor)?);
    let base_url = remote.base_url().to_string();
    let engine = Arc::new(SyncEngine::new(
        Arc::new(Mutex::new(storage)),
        remote,
        Arc::clone(&config),
        &actor,
    )?);

    let mut agent = SyncAgent::new(engine);
    agent.monitor_mut().on_change("announce", move |from, to| {
        if json {
            let line = serde_json::json!({ "event": "connection", "from": from, "to": to });
            println!("{line}");
        } else {
            println!("Remote is now {to} (was {from})");
        }
        Ok(())
    });

    if !json {
        println!(
            "Watching {base_url}: probing every {}s, sweeping every {}s. Ctrl-C to stop.",
            config.probe_interval_secs, config.sweep_interval_secs
        );
    }

    runtime()?.block_on(async {
        let shutdown = shutdown_on_ctrl_c();
        agent.run(shutdown).await
    })
}
