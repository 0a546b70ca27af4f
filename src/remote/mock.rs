//! In-memory remote for tests, with failure injection and call accounting.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::sync::compute_checksum;

use super::store::{RemoteRecord, RemoteStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Call {
    Fetch,
    Create,
    Update,
    Delete,
    Health,
}

/// Failure to inject into the next call.
#[derive(Debug, Clone)]
pub enum Failure {
    Transient,
    Rejected(u16),
}

impl Failure {
    fn into_error(self) -> Error {
        match self {
            Self::Transient => Error::TransientNetwork("injected failure".to_string()),
            Self::Rejected(status) => Error::Remote {
                status,
                message: "injected rejection".to_string(),
            },
        }
    }
}

#[derive(Debug, Default)]
struct State {
    records: HashMap<String, RemoteRecord>,
    calls: Vec<(Call, String)>,
    failures: VecDeque<Failure>,
    offline: bool,
    latency: Option<Duration>,
    churn: bool,
}

#[derive(Debug, Default)]
pub struct MockRemote {
    state: Mutex<State>,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Seed a record as if another device had written it.
    pub fn insert(&self, record: RemoteRecord) {
        self.state().records.insert(record.id.clone(), record);
    }

    pub fn get(&self, id: &str) -> Option<RemoteRecord> {
        self.state().records.get(id).cloned()
    }

    /// Fail the next `times` record calls.
    pub fn fail_next(&self, times: usize, failure: Failure) {
        let mut state = self.state();
        for _ in 0..times {
            state.failures.push_back(failure.clone());
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Make every fetch see a newer write from another device first.
    pub fn set_churn(&self, churn: bool) {
        self.state().churn = churn;
    }

    /// Delay every record call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = Some(latency);
    }

    pub fn count(&self, call: Call) -> usize {
        self.state().calls.iter().filter(|(c, _)| *c == call).count()
    }

    /// Calls made for one record, in order.
    pub fn calls_for(&self, id: &str) -> Vec<Call> {
        self.state()
            .calls
            .iter()
            .filter(|(_, target)| target == id)
            .map(|(c, _)| *c)
            .collect()
    }

    /// Log the call and decide whether it fails. Returns the latency to apply.
    fn begin(&self, call: Call, id: &str) -> Result<Option<Duration>> {
        let mut state = self.state();
        state.calls.push((call, id.to_string()));
        if state.offline {
            return Err(Error::TransientNetwork("connection refused".to_string()));
        }
        if let Some(failure) = state.failures.pop_front() {
            return Err(failure.into_error());
        }
        Ok(state.latency)
    }

    async fn enter(&self, call: Call, id: &str) -> Result<()> {
        if let Some(latency) = self.begin(call, id)? {
            tokio::time::sleep(latency).await;
        }
        Ok(())
    }
}

impl RemoteStore for MockRemote {
    async fn fetch(&self, id: &str) -> Result<Option<RemoteRecord>> {
        self.enter(Call::Fetch, id).await?;
        let mut state = self.state();
        if state.churn {
            if let Some(record) = state.records.get_mut(id) {
                record.version += 1;
                record.modified_at = chrono::Utc::now().timestamp_millis() + 60_000;
                record.payload.client.name.push('+');
                record.checksum = compute_checksum(&record.payload);
            }
        }
        Ok(state.records.get(id).cloned())
    }

    async fn create(&self, record: &RemoteRecord) -> Result<RemoteRecord> {
        self.enter(Call::Create, &record.id).await?;
        let mut state = self.state();
        if state.records.contains_key(&record.id) {
            return Err(Error::Remote {
                status: 409,
                message: "record exists".to_string(),
            });
        }
        state.records.insert(record.id.clone(), record.clone());
        Ok(record.clone())
    }

    async fn update(&self, record: &RemoteRecord, if_match: i64) -> Result<RemoteRecord> {
        self.enter(Call::Update, &record.id).await?;
        let mut state = self.state();
        let current = state.records.get(&record.id).map_or(0, |r| r.version);
        if current != if_match {
            return Err(Error::VersionConflict {
                id: record.id.clone(),
                expected: if_match,
                actual: current,
            });
        }
        state.records.insert(record.id.clone(), record.clone());
        Ok(record.clone())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.enter(Call::Delete, id).await?;
        self.state().records.remove(id);
        Ok(())
    }

    async fn health(&self) -> bool {
        let mut state = self.state();
        state.calls.push((Call::Health, String::new()));
        !state.offline
    }
}
