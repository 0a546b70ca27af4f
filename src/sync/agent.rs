//! Background sync loop.
//!
//! Ties the connection monitor to the engine: probe on a fixed interval,
//! sweep as soon as the remote comes back, and sweep periodically while it
//! stays reachable.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::error::Result;
use crate::remote::RemoteStore;

use super::engine::{wait_for_shutdown, SyncEngine};
use super::monitor::{ConnectionMonitor, ConnectionState};

/// Long-running sync driver.
pub struct SyncAgent<R> {
    engine: Arc<SyncEngine<R>>,
    monitor: ConnectionMonitor<R>,
}

impl<R: RemoteStore + 'static> SyncAgent<R> {
    #[must_use]
    pub fn new(engine: Arc<SyncEngine<R>>) -> Self {
        let monitor = ConnectionMonitor::new(Arc::clone(engine.remote()));
        Self { engine, monitor }
    }

    /// The monitor, e.g. to register callbacks before [`SyncAgent::run`].
    pub fn monitor_mut(&mut self) -> &mut ConnectionMonitor<R> {
        &mut self.monitor
    }

    /// Run until shutdown is signalled.
    ///
    /// Records left in flight by an earlier process are recovered first.
    ///
    /// # Errors
    ///
    /// Returns an error only if recovery fails; sweep failures are logged
    /// and the loop carries on.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.engine.recover()?;

        let config = self.engine.config();
        let mut probe = tokio::time::interval(config.probe_interval());
        probe.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut periodic = tokio::time::interval(config.sweep_interval());
        periodic.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first periodic tick fires immediately; the first probe covers it
        periodic.tick().await;

        tracing::info!(
            probe_secs = config.probe_interval_secs,
            sweep_secs = config.sweep_interval_secs,
            "Sync agent started"
        );

        loop {
            tokio::select! {
                _ = probe.tick() => {
                    if let Some((_, ConnectionState::Online)) = self.monitor.poll_once().await {
                        self.sweep(&shutdown).await;
                    }
                }
                _ = periodic.tick() => {
                    if self.monitor.state() == ConnectionState::Online {
                        self.sweep(&shutdown).await;
                    }
                }
                () = wait_for_shutdown(&mut shutdown) => {
                    tracing::info!("Sync agent stopping");
                    return Ok(());
                }
            }
        }
    }

    async fn sweep(&self, shutdown: &watch::Receiver<bool>) {
        if let Err(e) = self.engine.sweep(shutdown.clone()).await {
            tracing::error!(error = %e, "Sweep failed");
        }
    }
}
