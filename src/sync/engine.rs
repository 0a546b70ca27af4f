//! Synchronization engine.
//!
//! A sweep pushes every PENDING record's queued entries to the remote:
//!
//! 1. Records are ordered by their oldest queue entry and split into batches
//!    of `batch_size`.
//! 2. Each batch runs concurrently on a [`JoinSet`] and is joined before the
//!    next one starts.
//! 3. Per record, entries replay strictly in sequence order. Entries
//!    appended while the record is in flight are picked up in the same pass.
//!
//! Transient failures and automatic conflict resolutions each count against
//! `max_attempts` per record per sweep.
//!
//! The storage mutex is only ever held inside a synchronous closure, never
//! across an `.await`.

use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::model::{ConflictEntry, Operation, QueueEntry, Record, SyncStatus};
use crate::remote::{RemoteRecord, RemoteStore};
use crate::storage::SqliteStorage;
use crate::sync::hash::{compute_checksum, verify};
use crate::sync::occ;
use crate::sync::resolver::{ConflictResolver, Resolution};
use crate::sync::types::{RecordOutcome, RecordReport, SweepReport};

/// What delivering one queue entry led to.
enum Step {
    /// Entry delivered; the record is in this state now.
    Delivered(SyncStatus),
    /// A resolution was installed locally; replay continues with its entry.
    Resolved,
    /// Parked for a manual decision.
    Deferred,
}

/// Pushes queued local changes to a remote store.
pub struct SyncEngine<R> {
    storage: Arc<Mutex<SqliteStorage>>,
    remote: Arc<R>,
    config: Arc<SyncConfig>,
    resolver: ConflictResolver,
    actor: String,
    sweep_lock: tokio::sync::Mutex<()>,
}

impl<R: RemoteStore + 'static> SyncEngine<R> {
    /// Create an engine.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured strategy or tie-break is invalid.
    pub fn new(
        storage: Arc<Mutex<SqliteStorage>>,
        remote: Arc<R>,
        config: Arc<SyncConfig>,
        actor: &str,
    ) -> Result<Self> {
        let resolver = ConflictResolver::new(config.resolution_strategy()?, config.tie_break()?);
        Ok(Self {
            storage,
            remote,
            config,
            resolver,
            actor: actor.to_string(),
            sweep_lock: tokio::sync::Mutex::new(()),
        })
    }

    #[must_use]
    pub fn remote(&self) -> &Arc<R> {
        &self.remote
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn with_store<T>(&self, f: impl FnOnce(&mut SqliteStorage) -> Result<T>) -> Result<T> {
        let mut guard = self
            .storage
            .lock()
            .map_err(|_| Error::Other("storage lock poisoned".to_string()))?;
        f(&mut guard)
    }

    /// Hand records left SYNCING by a previous process back to PENDING.
    ///
    /// # Errors
    ///
    /// Returns an error if the store can't be updated.
    pub fn recover(&self) -> Result<usize> {
        let recovered = self.with_store(|s| s.recover_in_flight(&self.actor))?;
        if recovered > 0 {
            tracing::warn!(count = recovered, "Recovered records left in flight");
        }
        Ok(recovered)
    }

    /// Run one sweep over all PENDING records.
    ///
    /// Only one sweep runs at a time; a second caller waits for the first.
    /// Per-record failures end up in the report, not in the `Err` branch.
    ///
    /// # Errors
    ///
    /// Returns an error only if the pending set can't be read.
    pub async fn sweep(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Result<SweepReport> {
        let _running = self.sweep_lock.lock().await;

        let mut report = SweepReport {
            started_at: chrono::Utc::now().timestamp_millis(),
            ..SweepReport::default()
        };
        let ids = self.with_store(|s| s.pending_for_sweep())?;
        tracing::info!(records = ids.len(), "Sweep started");

        for batch in ids.chunks(self.config.batch_size.max(1)) {
            if *shutdown.borrow() {
                report.cancelled = true;
                break;
            }

            let mut tasks = JoinSet::new();
            for id in batch {
                let engine = Arc::clone(self);
                let id = id.clone();
                let shutdown = shutdown.clone();
                tasks.spawn(async move { engine.sync_record(id, shutdown).await });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(record) => {
                        if record.outcome == RecordOutcome::Cancelled {
                            report.cancelled = true;
                        }
                        report.records.push(record);
                    }
                    Err(e) => tracing::error!(error = %e, "Sync task aborted"),
                }
            }
        }

        report.finished_at = chrono::Utc::now().timestamp_millis();
        tracing::info!(
            synced = report.synced(),
            conflicts = report.conflicts(),
            failed = report.failed(),
            auto_resolved = report.auto_resolved(),
            cancelled = report.cancelled,
            "Sweep finished"
        );
        Ok(report)
    }

    async fn sync_record(&self, id: String, mut shutdown: watch::Receiver<bool>) -> RecordReport {
        let mut report = RecordReport {
            record_id: id.clone(),
            outcome: RecordOutcome::Skipped,
            attempts: 0,
            resolved_conflicts: 0,
        };

        match self.with_store(|s| s.claim(&id, &self.actor)) {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(record_id = %id, "Record not claimable, skipping");
                return report;
            }
            Err(e) => {
                report.outcome = RecordOutcome::Failed {
                    reason: e.to_string(),
                };
                return report;
            }
        }

        let outcome = match self.replay(&id, &mut shutdown, &mut report).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(record_id = %id, error = %e, "Sync attempt aborted");
                if let Err(release) = self.with_store(|s| s.release(&id, &self.actor)) {
                    tracing::error!(record_id = %id, error = %release, "Failed to release record");
                }
                RecordOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        };
        report.outcome = outcome;
        report
    }

    /// Replay a claimed record's queue until it is empty or something stops it.
    async fn replay(
        &self,
        id: &str,
        shutdown: &mut watch::Receiver<bool>,
        report: &mut RecordReport,
    ) -> Result<RecordOutcome> {
        let mut failures = 0_u32;

        loop {
            let Some(record) = self.with_store(|s| s.get(id))? else {
                // Purged by a delivered DELETE
                return Ok(RecordOutcome::Synced);
            };

            if let Err(e) = verify(&record) {
                tracing::error!(record_id = %id, error = %e, "Integrity check failed");
                return self.fail(id, &e);
            }

            let Some(entry) = self.with_store(|s| s.next_entry(id))? else {
                self.with_store(|s| s.update_status(id, SyncStatus::Synced, None, &self.actor))?;
                return Ok(RecordOutcome::Synced);
            };

            report.attempts += 1;
            let span = tracing::debug_span!(
                "deliver",
                record_id = %id,
                sequence = entry.sequence,
                operation = %entry.operation,
                attempt = report.attempts
            );

            match self.deliver(&record, &entry, shutdown).instrument(span).await {
                Ok(Step::Delivered(SyncStatus::Synced)) => return Ok(RecordOutcome::Synced),
                Ok(Step::Delivered(_)) => {}
                Ok(Step::Resolved) => {
                    report.resolved_conflicts += 1;
                    // The remote kept moving under every resolution
                    if report.resolved_conflicts > self.config.max_attempts {
                        let exhausted = Error::MaxRetriesExceeded {
                            id: id.to_string(),
                            attempts: report.resolved_conflicts,
                            reason: "remote changed again after each resolution".to_string(),
                        };
                        tracing::warn!(record_id = %id, error = %exhausted, "Giving up");
                        return self.fail(id, &exhausted);
                    }
                }
                Ok(Step::Deferred) => return Ok(RecordOutcome::Conflict),
                Err(Error::Cancelled) => {
                    self.with_store(|s| s.release(id, &self.actor))?;
                    tracing::info!(record_id = %id, "Sync interrupted, record released");
                    return Ok(RecordOutcome::Cancelled);
                }
                Err(e) if e.is_retryable() => {
                    failures += 1;
                    let reason = e.to_string();
                    self.with_store(|s| s.record_attempt_failure(entry.sequence, &reason))?;

                    if failures >= self.config.max_attempts {
                        let exhausted = Error::MaxRetriesExceeded {
                            id: id.to_string(),
                            attempts: failures,
                            reason,
                        };
                        tracing::warn!(record_id = %id, error = %exhausted, "Giving up");
                        return self.fail(id, &exhausted);
                    }

                    let delay = self.config.backoff_delay(failures);
                    tracing::info!(
                        record_id = %id,
                        attempt = failures,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Retrying after backoff"
                    );
                    if cancellable(shutdown, async {
                        tokio::time::sleep(delay).await;
                        Ok(())
                    })
                    .await
                    .is_err()
                    {
                        self.with_store(|s| s.release(id, &self.actor))?;
                        return Ok(RecordOutcome::Cancelled);
                    }
                }
                Err(e) => {
                    let reason = e.to_string();
                    self.with_store(|s| s.record_attempt_failure(entry.sequence, &reason))?;
                    tracing::warn!(record_id = %id, error = %e, "Remote rejected entry");
                    return self.fail(id, &e);
                }
            }
        }
    }

    fn fail(&self, id: &str, error: &Error) -> Result<RecordOutcome> {
        let reason = error.to_string();
        self.with_store(|s| s.mark_error(id, &reason, &self.actor))?;
        Ok(RecordOutcome::Failed { reason })
    }

    /// Push one entry.
    async fn deliver(
        &self,
        record: &Record,
        entry: &QueueEntry,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Step> {
        let id = record.id.as_str();

        if entry.operation == Operation::Delete {
            cancellable(shutdown, self.remote.delete(id)).await?;
            self.with_store(|s| s.purge(id, &self.actor))?;
            tracing::info!(record_id = %id, "Deleted on remote");
            return Ok(Step::Delivered(SyncStatus::Synced));
        }

        let remote = cancellable(shutdown, self.remote.fetch(id)).await?;
        let snapshot = RemoteRecord::from_entry(record, entry);

        let confirmed = match remote {
            None => {
                let created = cancellable(shutdown, self.remote.create(&snapshot)).await?;
                tracing::info!(record_id = %id, version = created.version, "Created on remote");
                created.version
            }
            Some(remote) if compute_checksum(&remote.payload) == snapshot.checksum => {
                tracing::debug!(record_id = %id, "Remote already has this payload");
                remote.version
            }
            Some(remote) if remote.version == record.remote_version => {
                let updated =
                    cancellable(shutdown, self.remote.update(&snapshot, remote.version)).await?;
                tracing::info!(record_id = %id, version = updated.version, "Updated on remote");
                updated.version
            }
            Some(remote) => return self.reconcile(record, &remote),
        };

        let status =
            self.with_store(|s| s.complete_entry(entry.sequence, id, confirmed, &self.actor))?;
        Ok(Step::Delivered(status))
    }

    /// The remote moved on since the last sync: resolve or park.
    fn reconcile(&self, local: &Record, remote: &RemoteRecord) -> Result<Step> {
        if !remote.is_intact() {
            return Err(Error::Integrity {
                id: remote.id.clone(),
                expected: remote.checksum.clone(),
                actual: compute_checksum(&remote.payload),
            });
        }

        let now = chrono::Utc::now().timestamp_millis();
        let mut conflict = ConflictEntry {
            id: 0,
            record_id: local.id.clone(),
            local_version: local.version,
            remote_version: remote.version,
            local_payload: local.payload.clone(),
            remote_payload: remote.payload.clone(),
            remote_modified_at: remote.modified_at,
            strategy: self.resolver.strategy.as_str().to_string(),
            detected_at: now,
            resolved_at: None,
        };

        tracing::info!(
            record_id = %local.id,
            local_version = local.version,
            remote_version = remote.version,
            strategy = %self.resolver.strategy,
            "Conflict detected"
        );

        match self.resolver.resolve(local, &remote.to_record()) {
            Resolution::Resolved(resolved) => {
                conflict.resolved_at = Some(now);
                let installed = self.with_store(|s| {
                    let installed =
                        occ::apply_resolution(s, &resolved, local.version, &self.actor)?;
                    if installed {
                        s.log_resolved_conflict(&conflict, &self.actor)?;
                    }
                    Ok(installed)
                })?;

                if installed {
                    tracing::info!(record_id = %local.id, version = resolved.version, "Conflict resolved");
                    Ok(Step::Resolved)
                } else {
                    let actual = self.with_store(|s| s.get_required(&local.id))?.version;
                    Err(Error::VersionConflict {
                        id: local.id.clone(),
                        expected: local.version,
                        actual,
                    })
                }
            }
            Resolution::Deferred => {
                self.with_store(|s| s.mark_conflict(&conflict, &self.actor))?;
                tracing::warn!(record_id = %local.id, "Conflict needs a manual decision");
                Ok(Step::Deferred)
            }
        }
    }
}

/// Run `fut` unless shutdown is signalled first.
async fn cancellable<T>(
    shutdown: &mut watch::Receiver<bool>,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    if *shutdown.borrow() {
        return Err(Error::Cancelled);
    }
    tokio::select! {
        result = fut => result,
        () = wait_for_shutdown(shutdown) => Err(Error::Cancelled),
    }
}

/// Resolves once shutdown is signalled; never if the sender goes away.
pub(crate) async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
