//! Synchronization engine
//!
//! Drains the asset queue and then the operation queue against the remote
//! service. A drain is single-flight twice over: an in-memory flag coalesces
//! concurrent calls within this context, and the durable lease keeps other
//! contexts (the background-delegated path) out while we hold it.
//!
//! Every loop iteration re-reads durable state, so work enqueued during a
//! drain is picked up by it and nothing stale is dispatched.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use futures_util::FutureExt;
use serde::Serialize;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use super::background::{BackgroundExecutor, BackgroundTask};
use super::lease::{LeaseAcquisition, LeaseManager, DEFAULT_LEASE_TTL};
use super::remote::{RemoteResponse, RemoteService, ResponseClass, TransportError};
use crate::assets::AssetQueue;
use crate::connectivity::{ConnectivityEvent, ConnectivityMonitor};
use crate::error::{SyncError, SyncResult};
use crate::events::{Notifier, Subscription, SyncEvent};
use crate::models::{QueuedAsset, QueuedOperation};
use crate::overlay::OptimisticOverlay;
use crate::queue::OperationQueue;
use crate::storage::{Collection, DurableStore, StorageResult};

/// Name the background drain is registered under
pub const BACKGROUND_TASK_NAME: &str = "offsync-drain";

/// What one call to [`SyncEngine::drain`] did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// A pass ran to completion or was aborted by a transport failure
    Completed(DrainReport),
    /// Another drain is already running in this context
    Coalesced,
    /// Another context holds the drain lease
    LeaseHeld,
    /// The attached monitor reports no connectivity
    Offline,
}

impl DrainOutcome {
    pub fn report(&self) -> Option<&DrainReport> {
        match self {
            DrainOutcome::Completed(report) => Some(report),
            _ => None,
        }
    }
}

/// Counters for one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub synced: usize,
    pub failed: usize,
    pub rejected: usize,
    /// Entries found PROCESSING from an interrupted pass
    pub recovered: usize,
    pub assets_uploaded: usize,
    pub assets_failed: usize,
    /// The pass stopped early on a transport failure or lost lease
    pub aborted: bool,
}

/// Clears the in-flight flag however the drain future ends
struct FlightGuard<'a>(&'a AtomicBool);

impl<'a> FlightGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// One engine context: a store connection, an owner id and the remote
pub struct SyncEngine {
    store: Arc<DurableStore>,
    queue: OperationQueue,
    assets: AssetQueue,
    overlay: OptimisticOverlay,
    remote: Arc<dyn RemoteService>,
    lease: LeaseManager,
    events: Notifier<SyncEvent>,
    monitor: RwLock<Option<Arc<ConnectivityMonitor>>>,
    attachment: Mutex<Option<Subscription>>,
    in_flight: AtomicBool,
}

impl SyncEngine {
    pub fn new(store: Arc<DurableStore>, remote: Arc<dyn RemoteService>) -> Self {
        let events = Notifier::new();
        Self {
            queue: OperationQueue::new(Arc::clone(&store)),
            assets: AssetQueue::new(Arc::clone(&store)),
            overlay: OptimisticOverlay::new(Arc::clone(&store), events.clone()),
            lease: LeaseManager::new(Arc::clone(&store), DEFAULT_LEASE_TTL),
            store,
            remote,
            events,
            monitor: RwLock::new(None),
            attachment: Mutex::new(None),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Use a different lease lifetime (also gets a fresh owner id)
    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease = LeaseManager::new(Arc::clone(&self.store), ttl);
        self
    }

    pub fn store(&self) -> &Arc<DurableStore> {
        &self.store
    }

    pub fn queue(&self) -> &OperationQueue {
        &self.queue
    }

    pub fn assets(&self) -> &AssetQueue {
        &self.assets
    }

    pub fn overlay(&self) -> &OptimisticOverlay {
        &self.overlay
    }

    pub fn remote(&self) -> &Arc<dyn RemoteService> {
        &self.remote
    }

    pub fn lease(&self) -> &LeaseManager {
        &self.lease
    }

    pub fn events(&self) -> &Notifier<SyncEvent> {
        &self.events
    }

    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(handler)
    }

    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        self.events.unsubscribe(subscription)
    }

    pub fn monitor(&self) -> Option<Arc<ConnectivityMonitor>> {
        self.monitor.read().ok().and_then(|monitor| monitor.clone())
    }

    /// Whether anything is waiting for automatic delivery
    pub fn has_pending_work(&self) -> StorageResult<bool> {
        Ok(self.queue.counts()?.retryable() > 0 || !self.assets.is_empty()?)
    }

    /// Follow a connectivity monitor
    ///
    /// Every offline -> online transition starts a drain on the current
    /// runtime, and every transition is forwarded as
    /// [`SyncEvent::ConnectivityChanged`]. Replaces any earlier attachment.
    pub fn attach(self: &Arc<Self>, monitor: Arc<ConnectivityMonitor>) {
        let engine = Arc::downgrade(self);
        let subscription = monitor.subscribe(move |event: &ConnectivityEvent| {
            let Some(engine) = engine.upgrade() else {
                return;
            };
            engine
                .events
                .emit(&SyncEvent::ConnectivityChanged(event.state()));

            if let ConnectivityEvent::BecameOnline(_) = event {
                match Handle::try_current() {
                    Ok(runtime) => {
                        runtime.spawn(async move {
                            if let Err(e) = engine.drain().await {
                                warn!("Drain after reconnect failed: {}", e);
                            }
                        });
                    }
                    Err(_) => warn!("No async runtime; not draining on reconnect"),
                }
            }
        });

        if let Some(previous) = self.replace_monitor(Some(Arc::clone(&monitor))) {
            if let Some(old) = self.take_attachment() {
                previous.unsubscribe(old);
            }
        }
        if let Ok(mut attachment) = self.attachment.lock() {
            *attachment = Some(subscription);
        }
        self.refresh_pending_work();
    }

    /// Stop following the attached monitor
    pub fn detach(&self) {
        if let Some(monitor) = self.replace_monitor(None) {
            if let Some(subscription) = self.take_attachment() {
                monitor.unsubscribe(subscription);
            }
        }
    }

    /// Register the background-delegated drain with `executor`
    ///
    /// Each run opens its own store connection and lease owner, so it shares
    /// nothing in memory with this context. Returns `false` when the
    /// executor declines or this engine has no database file to share.
    pub fn register_background(&self, executor: &dyn BackgroundExecutor) -> bool {
        let Some(path) = self.store.path().map(PathBuf::from) else {
            warn!("In-memory store cannot be shared with a background context");
            return false;
        };
        let remote = Arc::clone(&self.remote);
        let ttl = self.lease.ttl();

        let task: BackgroundTask = Arc::new(move || {
            let path = path.clone();
            let remote = Arc::clone(&remote);
            async move {
                let store = match DurableStore::open_path(&path) {
                    Ok(store) => Arc::new(store),
                    Err(e) => {
                        warn!("Background drain could not open the store: {}", e);
                        return;
                    }
                };
                let engine = SyncEngine::new(store, remote).with_lease_ttl(ttl);
                match engine.drain().await {
                    Ok(outcome) => debug!("Background drain: {:?}", outcome),
                    Err(e) => warn!("Background drain failed: {}", e),
                }
            }
            .boxed()
        });

        executor.register(BACKGROUND_TASK_NAME, task)
    }

    /// Deliver everything queued, oldest first
    ///
    /// Individual failures are recorded on the entries and reported through
    /// events; only storage failures are returned as errors. Dropping the
    /// future mid-pass is safe: the in-flight entry is recovered as FAILED
    /// by the next pass and the lease lapses after its TTL.
    pub async fn drain(&self) -> SyncResult<DrainOutcome> {
        let Some(_flight) = FlightGuard::try_acquire(&self.in_flight) else {
            debug!("Drain already running; coalescing");
            return Ok(DrainOutcome::Coalesced);
        };

        if let Some(monitor) = self.monitor() {
            if !monitor.is_online() {
                debug!("Offline; drain skipped");
                return Ok(DrainOutcome::Offline);
            }
        }

        if let LeaseAcquisition::HeldBy(holder) = self.lease.acquire()? {
            debug!("Drain lease held by {} until {}", holder.owner, holder.expires_at);
            return Ok(DrainOutcome::LeaseHeld);
        }

        let result = self.run_pass().await;
        if let Err(e) = self.lease.release() {
            warn!("Failed to release drain lease: {}", e);
        }
        let report = result?;

        self.refresh_pending_work();
        self.events.emit(&SyncEvent::SyncCompleted(report.synced));
        Ok(DrainOutcome::Completed(report))
    }

    async fn run_pass(&self) -> SyncResult<DrainReport> {
        let mut report = DrainReport {
            recovered: self.queue.recover_abandoned()?,
            ..DrainReport::default()
        };

        info!("Drain started");
        self.drain_assets(&mut report).await?;
        if !report.aborted {
            self.drain_operations(&mut report).await?;
        }

        info!(
            "Drain finished: {} synced, {} failed, {} rejected, {} assets uploaded{}",
            report.synced,
            report.failed,
            report.rejected,
            report.assets_uploaded,
            if report.aborted { " (aborted)" } else { "" }
        );
        Ok(report)
    }

    async fn drain_assets(&self, report: &mut DrainReport) -> SyncResult<()> {
        for asset in self.assets.list_pending()? {
            if !self.lease.renew()? {
                warn!("Drain lease lost to another context; stopping");
                report.aborted = true;
                return Ok(());
            }
            // Removed by another context since the listing
            if self.assets.get(&asset.id)?.is_none() {
                continue;
            }

            debug!("Uploading asset {} ({} bytes)", asset.id, asset.size_bytes);
            let response = match self.remote.upload_asset(&asset).await {
                Ok(response) => response,
                Err(e) => {
                    self.asset_failed(&asset, &e.to_string(), report)?;
                    self.connection_lost(&e);
                    report.aborted = true;
                    return Ok(());
                }
            };

            if !response.is_success() {
                let error = describe(&response);
                self.asset_failed(&asset, &error, report)?;
                continue;
            }
            let Some(remote_ref) = remote_reference(&response) else {
                self.asset_failed(&asset, "upload response carried no reference", report)?;
                continue;
            };

            let patched = self.store.transaction(|tx| {
                let patched = OptimisticOverlay::resolve_asset_in(tx, &asset.id, &remote_ref)?;
                tx.delete(Collection::Assets, &asset.id)?;
                Ok(patched)
            })?;

            debug!(
                "Asset {} -> {} ({} references rewritten)",
                asset.id, remote_ref, patched
            );
            report.assets_uploaded += 1;
            self.events.emit(&SyncEvent::AssetResolved {
                temp_id: asset.id.clone(),
                remote_ref,
            });
        }
        Ok(())
    }

    async fn drain_operations(&self, report: &mut DrainReport) -> SyncResult<()> {
        let mut cursor = None;

        while let Some(operation) = self.queue.next_pending(cursor)? {
            cursor = Some(operation.id);

            if !self.lease.renew()? {
                warn!("Drain lease lost to another context; stopping");
                report.aborted = true;
                break;
            }
            if !self.queue.mark_processing(operation.id)? {
                debug!("Operation {} no longer retryable; skipping", operation.id);
                continue;
            }

            debug!(
                "Dispatching operation {} ({} {})",
                operation.id, operation.method, operation.target_path
            );
            let response = match self
                .remote
                .call(operation.method, &operation.target_path, &operation.payload)
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    let error = SyncError::NetworkUnreachable(e.to_string()).to_string();
                    warn!("Operation {} not delivered: {}", operation.id, error);
                    self.queue.mark_failed(operation.id, &error)?;
                    report.failed += 1;
                    self.events.emit(&SyncEvent::SyncFailed {
                        operation,
                        error,
                        rejected: false,
                    });
                    self.connection_lost(&e);
                    report.aborted = true;
                    break;
                }
            };

            match response.classify() {
                ResponseClass::Success => {
                    let remap = self.store.transaction(|tx| {
                        tx.delete(Collection::Operations, &QueuedOperation::key(operation.id))?;
                        OptimisticOverlay::reconcile_in(tx, &operation, &response)
                    })?;

                    debug!("Operation {} acknowledged ({})", operation.id, response.status);
                    report.synced += 1;
                    self.events.emit(&SyncEvent::SyncSuccess(operation));
                    if let Some(remap) = remap {
                        self.overlay.announce(&remap);
                    }
                }
                ResponseClass::Retryable => {
                    let error = describe(&response);
                    warn!("Operation {} failed: {}", operation.id, error);
                    self.queue.mark_failed(operation.id, &error)?;
                    report.failed += 1;
                    self.events.emit(&SyncEvent::SyncFailed {
                        operation,
                        error,
                        rejected: false,
                    });
                }
                ResponseClass::Rejected => {
                    let error = SyncError::RemoteRejected {
                        status: response.status,
                        body: response.body_excerpt(),
                    }
                    .to_string();
                    warn!("Operation {} rejected: {}", operation.id, error);
                    self.queue.mark_rejected(operation.id, &error)?;
                    report.rejected += 1;
                    self.events.emit(&SyncEvent::SyncFailed {
                        operation,
                        error,
                        rejected: true,
                    });
                }
            }
        }
        Ok(())
    }

    fn asset_failed(
        &self,
        asset: &QueuedAsset,
        reason: &str,
        report: &mut DrainReport,
    ) -> SyncResult<()> {
        let error = SyncError::AssetUploadFailed {
            asset_id: asset.id.clone(),
            reason: reason.to_string(),
        };
        warn!("{}", error);
        self.assets.mark_failed(&asset.id, reason)?;
        report.assets_failed += 1;
        self.events.emit(&SyncEvent::AssetFailed {
            asset_id: asset.id.clone(),
            error: error.to_string(),
        });
        Ok(())
    }

    fn connection_lost(&self, error: &TransportError) {
        debug!("Transport failure, treating remote as unreachable: {}", error);
        if let Some(monitor) = self.monitor() {
            monitor.report_unreachable();
        }
    }

    fn refresh_pending_work(&self) {
        let Some(monitor) = self.monitor() else {
            return;
        };
        match self.has_pending_work() {
            Ok(pending) => monitor.set_pending_work(pending),
            Err(e) => warn!("Could not count pending work: {}", e),
        }
    }

    fn replace_monitor(
        &self,
        monitor: Option<Arc<ConnectivityMonitor>>,
    ) -> Option<Arc<ConnectivityMonitor>> {
        match self.monitor.write() {
            Ok(mut slot) => std::mem::replace(&mut *slot, monitor),
            Err(_) => None,
        }
    }

    fn take_attachment(&self) -> Option<Subscription> {
        self.attachment.lock().ok().and_then(|mut slot| slot.take())
    }
}

/// Status and body excerpt for logs and error records
fn describe(response: &RemoteResponse) -> String {
    let excerpt = response.body_excerpt();
    if excerpt.is_empty() {
        format!("HTTP {}", response.status)
    } else {
        format!("HTTP {}: {}", response.status, excerpt)
    }
}

/// Where the server put an uploaded asset
///
/// Looks for `url`, `location` or `id` in a JSON body, else takes the body
/// as plain text.
fn remote_reference(response: &RemoteResponse) -> Option<String> {
    if let Some(body) = response.body_json() {
        for field in ["url", "location", "id"] {
            match body.get(field) {
                Some(serde_json::Value::String(s)) if !s.is_empty() => return Some(s.clone()),
                Some(serde_json::Value::Number(n)) => return Some(n.to_string()),
                _ => {}
            }
        }
        return match body {
            serde_json::Value::String(s) if !s.is_empty() => Some(s),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        };
    }

    let text = String::from_utf8_lossy(&response.body).trim().to_string();
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Method, NewOperation, OperationStatus};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    /// Replies from a script; an empty script answers 200
    #[derive(Default)]
    struct ScriptedRemote {
        replies: Mutex<VecDeque<Result<RemoteResponse, TransportError>>>,
        calls: Mutex<Vec<(Method, String)>>,
        uploads: AtomicUsize,
    }

    impl ScriptedRemote {
        fn with(replies: Vec<Result<RemoteResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                ..Self::default()
            })
        }

        fn next(&self) -> Result<RemoteResponse, TransportError> {
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(RemoteResponse::new(200, "")))
        }
    }

    #[async_trait]
    impl RemoteService for ScriptedRemote {
        async fn call(
            &self,
            method: Method,
            target_path: &str,
            _payload: &[u8],
        ) -> Result<RemoteResponse, TransportError> {
            self.calls
                .lock()
                .unwrap()
                .push((method, target_path.to_string()));
            self.next()
        }

        async fn upload_asset(&self, _asset: &QueuedAsset) -> Result<RemoteResponse, TransportError> {
            self.uploads.fetch_add(1, Ordering::SeqCst);
            self.next()
        }
    }

    fn engine(remote: Arc<ScriptedRemote>) -> SyncEngine {
        SyncEngine::new(Arc::new(DurableStore::open_in_memory().unwrap()), remote)
    }

    fn update(path: &str) -> NewOperation {
        NewOperation::json(Method::Update, path, "member", &json!({"n": 1}))
    }

    #[tokio::test]
    async fn test_drain_delivers_in_order() {
        let remote = ScriptedRemote::with(vec![]);
        let engine = engine(remote.clone());
        engine.queue().enqueue(update("/a")).unwrap();
        engine.queue().enqueue(update("/b")).unwrap();

        let outcome = engine.drain().await.unwrap();

        assert_eq!(outcome.report().unwrap().synced, 2);
        let paths: Vec<_> = remote.calls.lock().unwrap().iter().map(|c| c.1.clone()).collect();
        assert_eq!(paths, vec!["/a", "/b"]);
        assert!(engine.queue().is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_response_classes() {
        let remote = ScriptedRemote::with(vec![
            Ok(RemoteResponse::new(503, "busy")),
            Ok(RemoteResponse::new(422, "bad field")),
            Ok(RemoteResponse::new(201, "")),
        ]);
        let engine = engine(remote);
        let a = engine.queue().enqueue(update("/a")).unwrap();
        let b = engine.queue().enqueue(update("/b")).unwrap();
        engine.queue().enqueue(update("/c")).unwrap();

        let report = *engine.drain().await.unwrap().report().unwrap();

        assert_eq!((report.synced, report.failed, report.rejected), (1, 1, 1));
        assert!(!report.aborted);
        let a = engine.queue().get(a).unwrap().unwrap();
        assert_eq!(a.status, OperationStatus::Failed);
        assert_eq!(a.last_error.as_deref(), Some("HTTP 503: busy"));
        let b = engine.queue().get(b).unwrap().unwrap();
        assert_eq!(b.status, OperationStatus::Rejected);
        assert_eq!(
            b.last_error.as_deref(),
            Some("Remote rejected request with status 422: bad field")
        );
    }

    #[tokio::test]
    async fn test_transport_error_aborts_pass() {
        let remote = ScriptedRemote::with(vec![Err(TransportError::Timeout)]);
        let engine = Arc::new(engine(remote.clone()));
        let monitor = Arc::new(ConnectivityMonitor::new(true, None));
        engine.attach(Arc::clone(&monitor));
        let a = engine.queue().enqueue(update("/a")).unwrap();
        engine.queue().enqueue(update("/b")).unwrap();

        let report = *engine.drain().await.unwrap().report().unwrap();

        assert!(report.aborted);
        assert_eq!(report.failed, 1);
        let a = engine.queue().get(a).unwrap().unwrap();
        assert!(a.last_error.unwrap().starts_with("Network unreachable: "));
        assert_eq!(remote.calls.lock().unwrap().len(), 1);
        assert!(!monitor.is_online());
        assert!(monitor.current_state().has_pending_work);

        assert_eq!(engine.drain().await.unwrap(), DrainOutcome::Offline);
    }

    #[tokio::test]
    async fn test_concurrent_drain_coalesces() {
        let engine = engine(ScriptedRemote::with(vec![]));
        let _held = FlightGuard::try_acquire(&engine.in_flight).unwrap();

        assert_eq!(engine.drain().await.unwrap(), DrainOutcome::Coalesced);
    }

    #[tokio::test]
    async fn test_foreign_lease_blocks_drain() {
        let engine = engine(ScriptedRemote::with(vec![]));
        let other = LeaseManager::new(Arc::clone(engine.store()), DEFAULT_LEASE_TTL);
        other.acquire().unwrap();
        engine.queue().enqueue(update("/a")).unwrap();

        assert_eq!(engine.drain().await.unwrap(), DrainOutcome::LeaseHeld);
        assert_eq!(engine.queue().len().unwrap(), 1);

        other.release().unwrap();
        assert!(matches!(engine.drain().await.unwrap(), DrainOutcome::Completed(_)));
        assert!(engine.lease().current().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sync_completed_emitted_per_pass() {
        let engine = engine(ScriptedRemote::with(vec![]));
        let (_token, mut rx) = engine.events().channel();
        engine.queue().enqueue(update("/a")).unwrap();

        engine.drain().await.unwrap();

        assert!(matches!(rx.recv().await, Some(SyncEvent::SyncSuccess(_))));
        assert_eq!(rx.recv().await, Some(SyncEvent::SyncCompleted(1)));
    }

    #[tokio::test]
    async fn test_asset_upload_patches_pending_payloads() {
        // The operation fails afterwards so its patched payload stays queued
        let remote = ScriptedRemote::with(vec![
            Ok(RemoteResponse::json(201, &json!({"url": "https://cdn/x.jpg"}))),
            Ok(RemoteResponse::new(503, "")),
        ]);
        let engine = engine(remote.clone());
        let asset_id = engine
            .assets()
            .enqueue("x.jpg", "image/jpeg", vec![1, 2, 3])
            .unwrap();
        let op = engine
            .queue()
            .enqueue(NewOperation::json(
                Method::Update,
                "/api/members/1",
                "member",
                &json!({"photo": asset_id}),
            ))
            .unwrap();

        let report = *engine.drain().await.unwrap().report().unwrap();

        assert_eq!(report.assets_uploaded, 1);
        assert_eq!(remote.uploads.load(Ordering::SeqCst), 1);
        assert!(engine.assets().is_empty().unwrap());
        let queued = engine.queue().get(op).unwrap().unwrap();
        assert_eq!(queued.payload_json().unwrap()["photo"], "https://cdn/x.jpg");
    }

    #[tokio::test]
    async fn test_failed_upload_is_reported_per_asset() {
        let remote = ScriptedRemote::with(vec![Ok(RemoteResponse::new(500, "disk"))]);
        let engine = engine(remote);
        let (_token, mut rx) = engine.events().channel();
        let asset_id = engine
            .assets()
            .enqueue("x.jpg", "image/jpeg", vec![1])
            .unwrap();

        let report = *engine.drain().await.unwrap().report().unwrap();

        assert_eq!(report.assets_failed, 1);
        let queued = engine.assets().get(&asset_id).unwrap().unwrap();
        assert_eq!(queued.last_error.as_deref(), Some("HTTP 500: disk"));
        assert_eq!(
            rx.recv().await,
            Some(SyncEvent::AssetFailed {
                asset_id: asset_id.clone(),
                error: format!("Upload of asset '{}' failed: HTTP 500: disk", asset_id),
            })
        );
    }

    #[tokio::test]
    async fn test_lease_lost_before_upload_stops_pass() {
        let engine = engine(ScriptedRemote::with(vec![]));
        engine.assets().enqueue("x.jpg", "image/jpeg", vec![1]).unwrap();
        engine.queue().enqueue(update("/a")).unwrap();
        engine.lease().acquire().unwrap();
        // Another context takes over between acquisition and the first upload
        let other = LeaseManager::new(Arc::clone(engine.store()), DEFAULT_LEASE_TTL);
        engine.store().delete(Collection::Leases, "drain").unwrap();
        other.acquire().unwrap();

        let mut report = DrainReport::default();
        engine.drain_assets(&mut report).await.unwrap();

        assert!(report.aborted);
        assert_eq!(report.assets_uploaded, 0);
        assert_eq!(engine.assets().len().unwrap(), 1);
    }

    #[test]
    fn test_remote_reference() {
        let json_body = RemoteResponse::json(201, &json!({"location": "/files/9"}));
        assert_eq!(remote_reference(&json_body).as_deref(), Some("/files/9"));

        let numeric = RemoteResponse::json(201, &json!({"id": 9}));
        assert_eq!(remote_reference(&numeric).as_deref(), Some("9"));

        let text = RemoteResponse::new(201, " https://cdn/a.png\n");
        assert_eq!(remote_reference(&text).as_deref(), Some("https://cdn/a.png"));

        assert!(remote_reference(&RemoteResponse::new(201, "")).is_none());
        assert!(remote_reference(&RemoteResponse::json(201, &json!({"ok": true}))).is_none());
    }
}
