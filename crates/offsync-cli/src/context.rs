//! Engine wiring shared by the commands

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use async_trait::async_trait;

use offsync_core::sync::{LivenessProbe, TransportError};
use offsync_core::{
    Config, ConnectivityMonitor, DurableStore, HttpRemote, Method, MutationFacade, QueuedAsset,
    RemoteResponse, RemoteService, SyncEngine,
};

/// Stand-in remote when no server is configured; every request fails
struct NoServer;

#[async_trait]
impl RemoteService for NoServer {
    async fn call(
        &self,
        _method: Method,
        _target_path: &str,
        _payload: &[u8],
    ) -> Result<RemoteResponse, TransportError> {
        Err(TransportError::Unreachable("no server configured".to_string()))
    }

    async fn upload_asset(&self, _asset: &QueuedAsset) -> Result<RemoteResponse, TransportError> {
        Err(TransportError::Unreachable("no server configured".to_string()))
    }
}

/// A fully wired engine context
pub struct AppContext {
    pub config: Config,
    pub engine: Arc<SyncEngine>,
    pub monitor: Arc<ConnectivityMonitor>,
    pub facade: MutationFacade,
}

impl AppContext {
    /// Open the store, build the remote and settle the initial connectivity
    ///
    /// With `force_offline` (or no server configured) the monitor starts
    /// offline and no request is made.
    pub async fn open(config: Config, force_offline: bool) -> Result<Self> {
        let store = Arc::new(DurableStore::open(&config).with_context(|| {
            format!("Failed to open database: {:?}", config.database_path())
        })?);

        let http = HttpRemote::from_config(&config)?.map(Arc::new);
        let (remote, probe) = match http {
            Some(ref http) => (
                Arc::clone(http) as Arc<dyn RemoteService>,
                Some(Arc::clone(http) as Arc<dyn LivenessProbe>),
            ),
            None => (Arc::new(NoServer) as Arc<dyn RemoteService>, None),
        };

        let engine = Arc::new(SyncEngine::new(store, remote).with_lease_ttl(config.lease_ttl()));
        let monitor = Arc::new(ConnectivityMonitor::new(false, probe));
        if http.is_some() && !force_offline {
            monitor.platform_signal(true).await;
        }
        engine.attach(Arc::clone(&monitor));

        let facade = MutationFacade::new(Arc::clone(&engine), Arc::clone(&monitor));
        Ok(Self {
            config,
            engine,
            monitor,
            facade,
        })
    }
}

/// Open the store for a read-only command
///
/// Uses a read-only connection when the database exists so inspection never
/// competes with a running `watch` for the write lock.
pub fn open_for_inspection(config: &Config) -> Result<Arc<DurableStore>> {
    let path: PathBuf = config.database_path();
    let store = if path.exists() {
        DurableStore::open_read_only(&path)
    } else {
        DurableStore::open_path(&path)
    };
    Ok(Arc::new(store.with_context(|| {
        format!("Failed to open database: {:?}", path)
    })?))
}
