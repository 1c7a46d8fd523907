//! Synchronization with the remote service
//!
//! Replays the durable queues against a [`RemoteService`].
//!
//! ## Protocol
//!
//! One drain pass:
//! 1. Take the in-memory single-flight guard and the durable lease
//! 2. Recover entries left PROCESSING by an interrupted pass
//! 3. Upload queued assets, patching references to their temporary ids
//! 4. Replay queued operations oldest first, re-reading the queue each step
//! 5. Release the lease and emit `SyncCompleted`
//!
//! Two triggers run the same pass: the foreground one (connectivity
//! restored while the app is running, see [`SyncEngine::attach`]) and the
//! background-delegated one (see [`SyncEngine::register_background`]).
//!
//! ## Usage
//!
//! ```ignore
//! let engine = Arc::new(SyncEngine::new(store, remote));
//! engine.attach(monitor);
//! engine.drain().await?;
//! ```

mod background;
mod engine;
mod http;
mod lease;
mod remote;

pub use background::{BackgroundExecutor, BackgroundTask, NoBackground, TokioBackgroundExecutor};
pub use engine::{DrainOutcome, DrainReport, SyncEngine, BACKGROUND_TASK_NAME};
pub use http::HttpRemote;
pub use lease::{DrainLease, LeaseAcquisition, LeaseManager, DEFAULT_LEASE_TTL};
pub use remote::{LivenessProbe, RemoteResponse, RemoteService, ResponseClass, TransportError};
