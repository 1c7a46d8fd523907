//! Data models for the sync engine
//!
//! Everything here is persisted through the durable store, so new fields
//! must carry a serde default: records written by older builds still decode.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::Record;

/// Sequence key of a queued operation (also its replay position)
pub type OperationId = u64;

/// Kind of mutating call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Method {
    Create,
    Update,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Create => "CREATE",
            Method::Update => "UPDATE",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CREATE" | "POST" => Ok(Method::Create),
            "UPDATE" | "PUT" | "PATCH" => Ok(Method::Update),
            "DELETE" => Ok(Method::Delete),
            other => Err(format!("unknown method '{}'", other)),
        }
    }
}

/// Lifecycle of a queued operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    /// Waiting for its first delivery attempt
    Pending,
    /// Dispatched, no response recorded yet
    Processing,
    /// Last attempt failed; retried on the next drain
    Failed,
    /// Refused by the server; needs manual resolution
    Rejected,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "PENDING",
            OperationStatus::Processing => "PROCESSING",
            OperationStatus::Failed => "FAILED",
            OperationStatus::Rejected => "REJECTED",
        }
    }

    /// Statuses picked up by the automatic retry path
    pub fn retryable() -> [OperationStatus; 2] {
        [OperationStatus::Pending, OperationStatus::Failed]
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A durably recorded mutating request awaiting delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    pub id: OperationId,
    pub target_path: String,
    pub method: Method,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
    pub enqueued_at: DateTime<Utc>,
    pub status: OperationStatus,
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Domain tag, e.g. "member"
    pub kind: String,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    /// Temporary id of the optimistic entity this CREATE materialises
    #[serde(default)]
    pub entity_ref: Option<String>,
}

impl QueuedOperation {
    /// Store key for an operation id
    ///
    /// Zero-padded so lexical and numeric order agree.
    pub fn key(id: OperationId) -> String {
        format!("{:020}", id)
    }

    /// Payload parsed as JSON, if it is JSON
    pub fn payload_json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.payload).ok()
    }
}

impl Record for QueuedOperation {
    fn index_tag(&self) -> Option<String> {
        Some(self.status.as_str().to_string())
    }
}

/// Input to [`crate::queue::OperationQueue::enqueue`]
#[derive(Debug, Clone, PartialEq)]
pub struct NewOperation {
    pub target_path: String,
    pub method: Method,
    pub payload: Vec<u8>,
    pub kind: String,
    pub entity_ref: Option<String>,
}

impl NewOperation {
    pub fn new(
        method: Method,
        target_path: impl Into<String>,
        kind: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            target_path: target_path.into(),
            method,
            payload,
            kind: kind.into(),
            entity_ref: None,
        }
    }

    /// Build from a JSON payload
    pub fn json(
        method: Method,
        target_path: impl Into<String>,
        kind: impl Into<String>,
        payload: &serde_json::Value,
    ) -> Self {
        let bytes = serde_json::to_vec(payload).unwrap_or_default();
        Self::new(method, target_path, kind, bytes)
    }

    pub fn with_entity_ref(mut self, temp_id: impl Into<String>) -> Self {
        self.entity_ref = Some(temp_id.into());
        self
    }
}

/// A pending binary upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedAsset {
    /// Client-generated temporary identifier
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    #[serde(with = "serde_bytes")]
    pub content: Vec<u8>,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl Record for QueuedAsset {}

/// Sync state of a locally materialised entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntitySyncStatus {
    Pending,
    Synced,
}

impl EntitySyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntitySyncStatus::Pending => "pending",
            EntitySyncStatus::Synced => "synced",
        }
    }
}

/// A domain object created locally before the server assigned its id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimisticEntity {
    /// Current id: `temp_<n>` until reconciled, then the server id
    pub id: String,
    pub kind: String,
    pub payload: serde_json::Value,
    pub sync_status: EntitySyncStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub synced_at: Option<DateTime<Utc>>,
    /// Temporary id the entity was created under
    #[serde(default)]
    pub temp_id: Option<String>,
}

impl OptimisticEntity {
    pub fn is_pending(&self) -> bool {
        self.sync_status == EntitySyncStatus::Pending
    }

    /// Key in the entities collection
    ///
    /// Temporary ids are unique on their own; server ids are only unique
    /// within a kind, so synced entities are keyed `kind/id`.
    pub fn storage_key(&self) -> String {
        match self.sync_status {
            EntitySyncStatus::Pending => self.id.clone(),
            EntitySyncStatus::Synced => entity_key(&self.kind, &self.id),
        }
    }

    /// JSON projection handed to UI code: the payload with id and status merged in
    pub fn to_view(&self) -> serde_json::Value {
        let mut view = match &self.payload {
            serde_json::Value::Object(map) => map.clone(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("value".to_string(), other.clone());
                map
            }
        };
        view.insert("id".to_string(), serde_json::Value::from(self.id.clone()));
        view.insert(
            "syncStatus".to_string(),
            serde_json::Value::from(self.sync_status.as_str()),
        );
        serde_json::Value::Object(view)
    }
}

impl Record for OptimisticEntity {
    fn index_tag(&self) -> Option<String> {
        Some(self.sync_status.as_str().to_string())
    }
}

/// Storage key of a synced entity
pub fn entity_key(kind: &str, server_id: &str) -> String {
    format!("{}/{}", kind, server_id)
}

/// Maps a temporary entity id to the server id it was reconciled to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityAlias {
    pub temp_id: String,
    pub server_id: String,
    #[serde(default)]
    pub kind: String,
}

impl EntityAlias {
    pub fn entity_key(&self) -> String {
        entity_key(&self.kind, &self.server_id)
    }
}

impl Record for EntityAlias {}

/// Process-wide connectivity snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityState {
    pub is_online: bool,
    pub has_pending_work: bool,
    pub last_online_at: Option<DateTime<Utc>>,
}

impl ConnectivityState {
    pub fn new(is_online: bool) -> Self {
        Self {
            is_online,
            has_pending_work: false,
            last_online_at: if is_online { Some(Utc::now()) } else { None },
        }
    }
}
