//! Subscriber notifications
//!
//! A [`Notifier`] is a cloneable handler registry. Handlers run
//! synchronously on the emitting task, outside the registry lock, so a
//! handler may subscribe or unsubscribe without deadlocking. Async
//! consumers use [`Notifier::channel`] instead.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use crate::models::{ConnectivityState, QueuedOperation};

/// Events emitted by the sync engine
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Operation acknowledged by the server and removed from the queue
    SyncSuccess(QueuedOperation),
    /// Operation attempt failed; `rejected` means it left the retry path
    SyncFailed {
        operation: QueuedOperation,
        error: String,
        rejected: bool,
    },
    /// Drain pass finished; carries the number of acknowledged operations
    SyncCompleted(usize),
    /// Temporary asset id now has a remote reference
    AssetResolved { temp_id: String, remote_ref: String },
    /// Asset upload failed; it stays queued
    AssetFailed { asset_id: String, error: String },
    /// Optimistic entity re-keyed to its server id
    EntityRemapped { temp_id: String, server_id: String },
    /// Connectivity transition observed by the monitor
    ConnectivityChanged(ConnectivityState),
}

/// Token returned by [`Notifier::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E> {
    next_id: AtomicU64,
    handlers: Mutex<BTreeMap<u64, Handler<E>>>,
}

/// Handler registry for events of type `E`
pub struct Notifier<E> {
    registry: Arc<Registry<E>>,
}

impl<E> Clone for Notifier<E> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<E> Default for Notifier<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Notifier<E> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                next_id: AtomicU64::new(1),
                handlers: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    /// Register a handler; keep the token to unsubscribe later
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers().insert(id, Arc::new(handler));
        Subscription(id)
    }

    /// Remove a handler, returning whether it was registered
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        self.handlers().remove(&subscription.0).is_some()
    }

    /// Deliver an event to every handler in subscription order
    pub fn emit(&self, event: &E) {
        let handlers: Vec<Handler<E>> = self.handlers().values().cloned().collect();
        for handler in handlers {
            handler(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers().len()
    }

    fn handlers(&self) -> MutexGuard<'_, BTreeMap<u64, Handler<E>>> {
        // A panicking handler runs outside the lock, so the map is never
        // left half-updated
        self.registry
            .handlers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<E: Clone + Send + 'static> Notifier<E> {
    /// Subscribe with an unbounded channel
    ///
    /// Events sent after the receiver is dropped are discarded; unsubscribe
    /// with the returned token to remove the handler.
    pub fn channel(&self) -> (Subscription, mpsc::UnboundedReceiver<E>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(move |event: &E| {
            let _ = tx.send(event.clone());
        });
        (subscription, rx)
    }
}
