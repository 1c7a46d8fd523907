//! offsync Core Library
//!
//! This crate provides the core functionality for offsync, an offline-first
//! client engine: writes made while the remote service is unreachable are
//! recorded durably and replayed, in order, once it is reachable again.
//!
//! # Architecture
//!
//! - **SQLite**: Durable store for queued operations, assets and entities
//! - **Connectivity monitor**: Platform signals confirmed by a liveness probe
//! - **Sync engine**: Single-flight drain, shared by foreground and background
//!   triggers through a durable lease
//!
//! Nothing the engine relies on is kept only in memory; a context that
//! crashes mid-drain leaves state the next one can resume from.
//!
//! # Quick Start
//!
//! ```text
//! let store = Arc::new(DurableStore::open(&config)?);
//! let remote = Arc::new(HttpRemote::new("https://api.example.org", config.request_timeout())?);
//! let monitor = Arc::new(ConnectivityMonitor::new(true, Some(remote.clone())));
//!
//! let engine = Arc::new(SyncEngine::new(store, remote));
//! engine.attach(monitor.clone());
//!
//! let facade = MutationFacade::new(engine, monitor);
//! facade.submit("/api/members", Method::Create, &payload, SubmitOptions::default()).await?;
//! ```
//!
//! # Modules
//!
//! - `storage`: Durable store (SQLite, CBOR-encoded records)
//! - `queue`: Operation queue
//! - `assets`: Binary upload queue
//! - `connectivity`: Connectivity monitor
//! - `sync`: Sync engine, lease, background trigger, remote contract
//! - `overlay`: Optimistic entities and id reconciliation
//! - `facade`: Mutation entry point
//! - `events`: Subscriber notifications
//! - `config`: Application configuration

pub mod assets;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod events;
pub mod facade;
pub mod models;
pub mod overlay;
pub mod patch;
pub mod queue;
pub mod storage;
pub mod sync;

pub use assets::AssetQueue;
pub use config::Config;
pub use connectivity::{ConnectivityEvent, ConnectivityMonitor, PollingHandle};
pub use error::{SyncError, SyncResult};
pub use events::{Notifier, Subscription, SyncEvent};
pub use facade::{MutationFacade, SubmitOptions};
pub use models::{
    ConnectivityState, EntitySyncStatus, Method, NewOperation, OperationId, OperationStatus,
    OptimisticEntity, QueuedAsset, QueuedOperation,
};
pub use overlay::OptimisticOverlay;
pub use queue::{OperationQueue, QueueCounts};
pub use storage::{DurableStore, StorageError};
pub use sync::{
    DrainOutcome, DrainReport, HttpRemote, RemoteResponse, RemoteService, SyncEngine,
    TokioBackgroundExecutor,
};
