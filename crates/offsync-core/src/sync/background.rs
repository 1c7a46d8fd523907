//! Background-delegated drain trigger
//!
//! A [`BackgroundExecutor`] runs a registered task when connectivity comes
//! back and on a fixed interval, independently of any foreground caller.
//! Registration reports whether the capability exists at all; when it does
//! not, the foreground path is the only trigger.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::connectivity::ConnectivityMonitor;
use crate::models::ConnectivityState;

/// Work handed to an executor; invoked once per wake-up
pub type BackgroundTask = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

pub trait BackgroundExecutor: Send + Sync {
    /// Register `task` under `name`, replacing any task of the same name
    ///
    /// Returns `false` when background execution is unavailable.
    fn register(&self, name: &str, task: BackgroundTask) -> bool;
}

/// Executor for platforms without background execution
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBackground;

impl BackgroundExecutor for NoBackground {
    fn register(&self, name: &str, _task: BackgroundTask) -> bool {
        debug!("Background execution unavailable; '{}' not registered", name);
        false
    }
}

/// Runs registered tasks on the tokio runtime
pub struct TokioBackgroundExecutor {
    interval: Duration,
    monitor: Option<Arc<ConnectivityMonitor>>,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl TokioBackgroundExecutor {
    pub fn new(interval: Duration, monitor: Option<Arc<ConnectivityMonitor>>) -> Self {
        Self {
            interval,
            monitor,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn registered(&self) -> usize {
        self.tasks.lock().map(|tasks| tasks.len()).unwrap_or(0)
    }

    /// Stop every registered task
    pub fn shutdown(&self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for (name, task) in tasks.drain() {
                debug!("Stopping background task '{}'", name);
                task.abort();
            }
        }
    }
}

impl BackgroundExecutor for TokioBackgroundExecutor {
    fn register(&self, name: &str, task: BackgroundTask) -> bool {
        let Ok(runtime) = Handle::try_current() else {
            warn!("No async runtime; background task '{}' not registered", name);
            return false;
        };
        let Ok(mut tasks) = self.tasks.lock() else {
            return false;
        };

        let mut wake = Wake::new(self.monitor.as_ref().map(|m| m.watch()));
        let interval = self.interval;
        let task_name = name.to_string();

        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        debug!("Background task '{}' woke on interval", task_name);
                    }
                    _ = wake.connectivity_restored() => {
                        debug!("Background task '{}' woke on reconnect", task_name);
                    }
                }
                task().await;
            }
        });

        if let Some(previous) = tasks.insert(name.to_string(), handle) {
            previous.abort();
        }
        info!("Registered background task '{}' (every {:?})", name, interval);
        true
    }
}

impl Drop for TokioBackgroundExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Tracks offline -> online transitions seen through a watch receiver
struct Wake {
    rx: Option<watch::Receiver<ConnectivityState>>,
    was_online: bool,
}

impl Wake {
    fn new(mut rx: Option<watch::Receiver<ConnectivityState>>) -> Self {
        let was_online = rx
            .as_mut()
            .map(|rx| rx.borrow_and_update().is_online)
            .unwrap_or(false);
        Self { rx, was_online }
    }

    /// Resolves on the next offline -> online transition; never without a monitor
    async fn connectivity_restored(&mut self) {
        loop {
            let Some(rx) = self.rx.as_mut() else {
                return std::future::pending().await;
            };
            if rx.changed().await.is_err() {
                self.rx = None;
                continue;
            }
            let online = rx.borrow_and_update().is_online;
            let restored = online && !self.was_online;
            self.was_online = online;
            if restored {
                return;
            }
        }
    }
}
