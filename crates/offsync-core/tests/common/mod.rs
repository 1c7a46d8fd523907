//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tempfile::TempDir;

use offsync_core::sync::{LivenessProbe, TransportError};
use offsync_core::{
    DurableStore, Method, QueuedAsset, RemoteResponse, RemoteService, SyncEngine, SyncEvent,
};

/// One request seen by the fake remote
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub payload: Option<Value>,
}

/// Remote that answers from a script and records every request
///
/// With an empty script, calls answer `200 {}` and uploads answer
/// `201 {"url": "https://cdn.test/<name>"}`.
#[derive(Default)]
pub struct FakeRemote {
    replies: Mutex<VecDeque<Result<RemoteResponse, TransportError>>>,
    calls: Mutex<Vec<RecordedCall>>,
    uploads: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn scripted(replies: Vec<Result<RemoteResponse, TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            ..Self::default()
        })
    }

    /// Every request sleeps for `delay` before answering
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.calls().into_iter().map(|call| call.path).collect()
    }

    pub fn uploads(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }

    fn next_reply(&self) -> Option<Result<RemoteResponse, TransportError>> {
        self.replies.lock().unwrap().pop_front()
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl RemoteService for FakeRemote {
    async fn call(
        &self,
        method: Method,
        target_path: &str,
        payload: &[u8],
    ) -> Result<RemoteResponse, TransportError> {
        self.calls.lock().unwrap().push(RecordedCall {
            method,
            path: target_path.to_string(),
            payload: serde_json::from_slice(payload).ok(),
        });
        self.pause().await;
        self.next_reply()
            .unwrap_or_else(|| Ok(RemoteResponse::json(200, &serde_json::json!({}))))
    }

    async fn upload_asset(&self, asset: &QueuedAsset) -> Result<RemoteResponse, TransportError> {
        self.uploads.lock().unwrap().push(asset.id.clone());
        self.pause().await;
        self.next_reply().unwrap_or_else(|| {
            Ok(RemoteResponse::json(
                201,
                &serde_json::json!({ "url": format!("https://cdn.test/{}", asset.name) }),
            ))
        })
    }
}

/// Probe whose answer the test controls
pub struct FakeProbe {
    reachable: AtomicBool,
}

impl FakeProbe {
    pub fn new(reachable: bool) -> Arc<Self> {
        Arc::new(Self {
            reachable: AtomicBool::new(reachable),
        })
    }

    pub fn set(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }
}

#[async_trait]
impl LivenessProbe for FakeProbe {
    async fn check(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}

/// A database file in a temporary directory
pub struct TestDb {
    _dir: TempDir,
    path: PathBuf,
}

impl TestDb {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("offsync.db");
        DurableStore::open_path(&path).unwrap();
        Self { _dir: dir, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A fresh connection, as a separate context would open
    pub fn store(&self) -> Arc<DurableStore> {
        Arc::new(DurableStore::open_path(&self.path).unwrap())
    }

    pub fn engine(&self, remote: Arc<FakeRemote>) -> Arc<SyncEngine> {
        Arc::new(SyncEngine::new(self.store(), remote))
    }

    /// An engine whose drain lease lapses after `ttl` without renewal
    pub fn engine_with_ttl(&self, remote: Arc<FakeRemote>, ttl: Duration) -> Arc<SyncEngine> {
        Arc::new(SyncEngine::new(self.store(), remote).with_lease_ttl(ttl))
    }
}

/// Collect every event an engine emits
pub fn record_events(engine: &SyncEngine) -> Arc<Mutex<Vec<SyncEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    engine.subscribe(move |event| sink.lock().unwrap().push(event.clone()));
    seen
}

/// Poll `condition` until it holds or a second passes
pub async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
