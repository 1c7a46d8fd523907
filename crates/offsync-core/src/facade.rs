//! Mutation façade
//!
//! The single entry point UI code uses for writes. Online, the call goes
//! straight to the remote service and its response comes back untouched.
//! Offline (or when the call fails in flight), the write is queued and the
//! caller gets a synthetic `202 Accepted` shaped like a success body, so it
//! can carry on without caring which path was taken.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{info, warn};

use crate::connectivity::ConnectivityMonitor;
use crate::error::SyncResult;
use crate::models::{Method, NewOperation};
use crate::sync::{RemoteResponse, SyncEngine};

/// Status of the synthetic response returned for queued writes
pub const ACCEPTED: u16 = 202;

/// Per-call options for [`MutationFacade::submit`]
#[derive(Debug, Clone)]
pub struct SubmitOptions {
    /// Domain tag recorded on the queue entry; derived from the path if unset
    pub kind: Option<String>,
    /// Materialise queued CREATEs as optimistic entities
    pub optimistic: bool,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            kind: None,
            optimistic: true,
        }
    }
}

impl SubmitOptions {
    pub fn kind(kind: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.into()),
            ..Self::default()
        }
    }

    pub fn without_optimistic(mut self) -> Self {
        self.optimistic = false;
        self
    }
}

pub struct MutationFacade {
    engine: Arc<SyncEngine>,
    monitor: Arc<ConnectivityMonitor>,
}

impl MutationFacade {
    pub fn new(engine: Arc<SyncEngine>, monitor: Arc<ConnectivityMonitor>) -> Self {
        Self { engine, monitor }
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    /// Perform a write now, or queue it for later
    ///
    /// Errors only when queueing fails; remote error responses are returned
    /// as responses.
    pub async fn submit(
        &self,
        target_path: &str,
        method: Method,
        payload: &Value,
        options: SubmitOptions,
    ) -> SyncResult<RemoteResponse> {
        if self.monitor.is_online() {
            let body = encode(payload);
            match self.engine.remote().call(method, target_path, &body).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    warn!("{} {} failed in flight ({}); queueing", method, target_path, e);
                    self.monitor.report_unreachable();
                }
            }
        }

        self.queue(target_path, method, payload, options)
    }

    /// Capture a binary for upload on the next drain, returning its temporary id
    pub fn submit_asset(
        &self,
        name: &str,
        mime_type: &str,
        content: Vec<u8>,
    ) -> SyncResult<String> {
        let id = self.engine.assets().enqueue(name, mime_type, content)?;
        self.monitor.set_pending_work(true);
        Ok(id)
    }

    fn queue(
        &self,
        target_path: &str,
        method: Method,
        payload: &Value,
        options: SubmitOptions,
    ) -> SyncResult<RemoteResponse> {
        let kind = options
            .kind
            .unwrap_or_else(|| kind_from_path(target_path));

        let body = if method == Method::Create && options.optimistic {
            let (entity, operation_id) =
                self.engine
                    .overlay()
                    .create_optimistic(&kind, target_path, payload)?;
            let mut view = entity.to_view();
            if let Value::Object(ref mut fields) = view {
                fields.insert("queued".to_string(), Value::Bool(true));
                fields.insert("operationId".to_string(), Value::from(operation_id));
            }
            info!("Queued {} {} as {}", method, target_path, entity.id);
            view
        } else {
            let operation_id = self.engine.queue().enqueue(NewOperation::new(
                method,
                target_path,
                kind,
                encode(payload),
            ))?;
            info!("Queued {} {} as operation {}", method, target_path, operation_id);
            json!({ "queued": true, "operationId": operation_id })
        };

        self.monitor.set_pending_work(true);
        Ok(RemoteResponse::json(ACCEPTED, &body))
    }
}

/// `null` means no body
fn encode(payload: &Value) -> Vec<u8> {
    if payload.is_null() {
        Vec::new()
    } else {
        serde_json::to_vec(payload).unwrap_or_default()
    }
}

/// Last path segment that names a collection rather than an id
fn kind_from_path(target_path: &str) -> String {
    let route = target_path.split('?').next().unwrap_or_default();
    route
        .split('/')
        .filter(|segment| !segment.is_empty())
        .filter(|segment| !segment.chars().any(|c| c.is_ascii_digit()))
        .last()
        .unwrap_or("resource")
        .to_string()
}
