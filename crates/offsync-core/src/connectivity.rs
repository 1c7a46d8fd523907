//! Connectivity monitor
//!
//! Combines platform reachability signals with a liveness probe against the
//! remote service. A platform "offline" is trusted immediately; a platform
//! "online" is only believed once the probe answers, because captive
//! portals and half-up links report online without a usable route.
//!
//! State lives in a `watch` channel. Transitions are applied with
//! `send_if_modified`, so each change of `is_online` produces exactly one
//! [`ConnectivityEvent`] regardless of how many signals race.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::events::{Notifier, Subscription};
use crate::models::ConnectivityState;
use crate::sync::LivenessProbe;

/// Default interval between liveness checks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// A change of `is_online`, carrying the state after the change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    BecameOnline(ConnectivityState),
    BecameOffline(ConnectivityState),
}

impl ConnectivityEvent {
    pub fn state(&self) -> ConnectivityState {
        match self {
            ConnectivityEvent::BecameOnline(state) | ConnectivityEvent::BecameOffline(state) => {
                *state
            }
        }
    }
}

/// Process-wide view of whether the remote service is reachable
pub struct ConnectivityMonitor {
    state: watch::Sender<ConnectivityState>,
    probe: Option<Arc<dyn LivenessProbe>>,
    events: Notifier<ConnectivityEvent>,
}

impl ConnectivityMonitor {
    /// Create a monitor starting in the given state
    ///
    /// Without a probe, platform signals are taken at face value.
    pub fn new(initially_online: bool, probe: Option<Arc<dyn LivenessProbe>>) -> Self {
        let (state, _) = watch::channel(ConnectivityState::new(initially_online));
        Self {
            state,
            probe,
            events: Notifier::new(),
        }
    }

    pub fn current_state(&self) -> ConnectivityState {
        *self.state.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.state.borrow().is_online
    }

    /// Receiver that observes every state change, including pending work
    pub fn watch(&self) -> watch::Receiver<ConnectivityState> {
        self.state.subscribe()
    }

    /// Register a transition handler
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ConnectivityEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(handler)
    }

    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        self.events.unsubscribe(subscription)
    }

    pub fn events(&self) -> &Notifier<ConnectivityEvent> {
        &self.events
    }

    /// Feed a platform reachability signal; returns the resulting state
    pub async fn platform_signal(&self, online: bool) -> bool {
        if !online {
            debug!("Platform reports offline");
            return self.set_online(false);
        }

        let confirmed = self.probe_reachable().await;
        if !confirmed {
            debug!("Platform reports online but the liveness check failed");
        }
        self.set_online(confirmed)
    }

    /// Re-derive state from the probe; without a probe the state is kept
    pub async fn refresh(&self) -> bool {
        match self.probe {
            Some(ref probe) => {
                let reachable = probe.check().await;
                self.set_online(reachable)
            }
            None => self.is_online(),
        }
    }

    /// A call failed mid-flight: the service is not reachable right now
    pub fn report_unreachable(&self) {
        self.set_online(false);
    }

    pub fn set_pending_work(&self, pending: bool) {
        self.state.send_if_modified(|state| {
            if state.has_pending_work == pending {
                return false;
            }
            state.has_pending_work = pending;
            true
        });
    }

    /// Poll the probe on a fixed interval until the handle is dropped
    pub fn start_polling(self: &Arc<Self>, interval: Duration) -> PollingHandle {
        let monitor = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                monitor.refresh().await;
            }
        });

        debug!("Connectivity polling every {:?}", interval);
        PollingHandle { task }
    }

    async fn probe_reachable(&self) -> bool {
        match self.probe {
            Some(ref probe) => probe.check().await,
            None => true,
        }
    }

    fn set_online(&self, online: bool) -> bool {
        let mut transition = None;
        self.state.send_if_modified(|state| {
            if state.is_online == online {
                return false;
            }
            state.is_online = online;
            if online {
                state.last_online_at = Some(Utc::now());
            }
            transition = Some(*state);
            true
        });

        if let Some(state) = transition {
            let event = if online {
                info!("Connectivity restored");
                ConnectivityEvent::BecameOnline(state)
            } else {
                info!("Connectivity lost");
                ConnectivityEvent::BecameOffline(state)
            };
            self.events.emit(&event);
        }
        online
    }
}

/// Running liveness poll; aborted when dropped
pub struct PollingHandle {
    task: JoinHandle<()>,
}

impl PollingHandle {
    pub fn stop(self) {}
}

impl Drop for PollingHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeProbe {
        reachable: AtomicBool,
        checks: AtomicUsize,
    }

    impl FakeProbe {
        fn new(reachable: bool) -> Arc<Self> {
            Arc::new(Self {
                reachable: AtomicBool::new(reachable),
                checks: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LivenessProbe for FakeProbe {
        async fn check(&self) -> bool {
            self.checks.fetch_add(1, Ordering::SeqCst);
            self.reachable.load(Ordering::SeqCst)
        }
    }

    fn record_events(monitor: &ConnectivityMonitor) -> Arc<Mutex<Vec<ConnectivityEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        monitor.subscribe(move |event| sink.lock().unwrap().push(*event));
        seen
    }

    #[tokio::test]
    async fn test_offline_signal_is_trusted_immediately() {
        let probe = FakeProbe::new(true);
        let monitor = ConnectivityMonitor::new(true, Some(probe.clone()));

        assert!(!monitor.platform_signal(false).await);
        assert!(!monitor.is_online());
        assert_eq!(probe.checks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_online_signal_needs_probe_confirmation() {
        let probe = FakeProbe::new(false);
        let monitor = ConnectivityMonitor::new(false, Some(probe.clone()));

        assert!(!monitor.platform_signal(true).await);
        assert!(!monitor.is_online());

        probe.reachable.store(true, Ordering::SeqCst);
        assert!(monitor.platform_signal(true).await);
        assert!(monitor.current_state().last_online_at.is_some());
    }

    #[tokio::test]
    async fn test_transitions_fire_exactly_once() {
        let monitor = ConnectivityMonitor::new(false, None);
        let seen = record_events(&monitor);

        monitor.platform_signal(true).await;
        monitor.platform_signal(true).await;
        monitor.report_unreachable();
        monitor.report_unreachable();
        monitor.platform_signal(false).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(matches!(seen[0], ConnectivityEvent::BecameOnline(s) if s.is_online));
        assert!(matches!(seen[1], ConnectivityEvent::BecameOffline(s) if !s.is_online));
    }

    #[tokio::test]
    async fn test_refresh_follows_probe() {
        let probe = FakeProbe::new(true);
        let monitor = ConnectivityMonitor::new(false, Some(probe.clone()));
        let seen = record_events(&monitor);

        assert!(monitor.refresh().await);
        probe.reachable.store(false, Ordering::SeqCst);
        assert!(!monitor.refresh().await);

        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_pending_work_updates_watch_without_transition() {
        let monitor = ConnectivityMonitor::new(true, None);
        let seen = record_events(&monitor);
        let mut rx = monitor.watch();

        monitor.set_pending_work(true);
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().has_pending_work);

        monitor.set_pending_work(true);
        assert!(!rx.has_changed().unwrap());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_polling_detects_recovery() {
        let probe = FakeProbe::new(true);
        let monitor = Arc::new(ConnectivityMonitor::new(false, Some(probe.clone())));

        let handle = monitor.start_polling(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(monitor.is_online());

        handle.stop();
        let checks = probe.checks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(probe.checks.load(Ordering::SeqCst), checks);
    }
}
