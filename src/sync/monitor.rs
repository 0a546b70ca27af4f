//! Connectivity monitoring.
//!
//! Each [`ConnectionMonitor::poll_once`] probes the remote's health endpoint
//! and updates an OFFLINE/ONLINE state; the agent calls it on a fixed
//! interval. Observers either subscribe to the state
//! channel or register named callbacks; callbacks only run on transitions.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use crate::error::Result;
use crate::remote::RemoteStore;

/// Whether the remote is reachable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    #[default]
    Offline,
    Online,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Offline => "OFFLINE",
            Self::Online => "ONLINE",
        })
    }
}

/// Transition callback: receives the previous and the new state.
pub type StateCallback =
    Box<dyn Fn(ConnectionState, ConnectionState) -> Result<()> + Send + Sync>;

/// Probes the remote and reports connectivity transitions.
pub struct ConnectionMonitor<R> {
    remote: Arc<R>,
    state: watch::Sender<ConnectionState>,
    callbacks: Vec<(String, StateCallback)>,
}

impl<R: RemoteStore> ConnectionMonitor<R> {
    /// Create a monitor. The remote is assumed OFFLINE until the first probe.
    #[must_use]
    pub fn new(remote: Arc<R>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Offline);
        Self {
            remote,
            state,
            callbacks: Vec::new(),
        }
    }

    /// Register a callback to run on every transition.
    pub fn on_change(
        &mut self,
        name: impl Into<String>,
        callback: impl Fn(ConnectionState, ConnectionState) -> Result<()> + Send + Sync + 'static,
    ) {
        self.callbacks.push((name.into(), Box::new(callback)));
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Probe once.
    ///
    /// Returns `Some((from, to))` when the state changed, after every
    /// callback has run. A failing or panicking callback is logged and the
    /// remaining ones still run.
    pub async fn poll_once(&self) -> Option<(ConnectionState, ConnectionState)> {
        let next = if self.remote.health().await {
            ConnectionState::Online
        } else {
            ConnectionState::Offline
        };

        let previous = self.state.send_replace(next);
        if previous == next {
            return None;
        }

        tracing::info!(from = %previous, to = %next, "Connection state changed");
        for (name, callback) in &self.callbacks {
            match std::panic::catch_unwind(AssertUnwindSafe(|| callback(previous, next))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(callback = %name, error = %e, "Connection callback failed");
                }
                Err(_) => tracing::error!(callback = %name, "Connection callback panicked"),
            }
        }
        Some((previous, next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::remote::mock::MockRemote;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_callbacks_fire_on_edges_only() {
        let remote = Arc::new(MockRemote::new());
        let mut monitor = ConnectionMonitor::new(Arc::clone(&remote));

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        monitor.on_change("count", move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(
            monitor.poll_once().await,
            Some((ConnectionState::Offline, ConnectionState::Online))
        );
        assert_eq!(monitor.poll_once().await, None);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        remote.set_offline(true);
        assert_eq!(
            monitor.poll_once().await,
            Some((ConnectionState::Online, ConnectionState::Offline))
        );
        assert_eq!(monitor.poll_once().await, None);
        assert_eq!(fired.load(Ordering::SeqCst), 2);
        assert_eq!(monitor.state(), ConnectionState::Offline);
    }

    #[tokio::test]
    async fn test_failing_callback_does_not_stop_others() {
        let remote = Arc::new(MockRemote::new());
        let mut monitor = ConnectionMonitor::new(remote);

        let reached = Arc::new(AtomicUsize::new(0));
        monitor.on_change("fails", |_, _| Err(Error::Other("boom".into())));
        monitor.on_change("panics", |_, _| panic!("callback bug"));
        let counter = Arc::clone(&reached);
        monitor.on_change("after", move |_, to| {
            assert_eq!(to, ConnectionState::Online);
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert!(monitor.poll_once().await.is_some());
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions() {
        let remote = Arc::new(MockRemote::new());
        let monitor = ConnectionMonitor::new(remote);
        let mut rx = monitor.subscribe();

        monitor.poll_once().await;
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), ConnectionState::Online);
    }
}
