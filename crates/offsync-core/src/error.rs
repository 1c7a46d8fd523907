//! Sync engine errors
//!
//! Failures of a single queued operation never propagate out of a drain:
//! the engine records them as status transitions and reports them through
//! events, described by the `NetworkUnreachable`, `RemoteRejected` and
//! `AssetUploadFailed` variants. What propagates is anything that makes the
//! durable state untrustworthy, plus enqueue failures the caller must know
//! about.

use thiserror::Error;

use crate::models::OperationId;
use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum SyncError {
    /// The durable store is compromised; fatal for the current drain
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] StorageError),

    /// The enqueue did not persist; the write will not happen later
    #[error("Failed to queue write: {0}")]
    QueueWriteFailed(#[source] StorageError),

    /// Remote service could not be reached (retryable)
    #[error("Network unreachable: {0}")]
    NetworkUnreachable(String),

    /// Remote service refused the request (non-retryable by contract)
    #[error("Remote rejected request with status {}{}", .status, body_suffix(.body))]
    RemoteRejected { status: u16, body: String },

    /// Binary upload failed (retryable)
    #[error("Upload of asset '{asset_id}' failed: {reason}")]
    AssetUploadFailed { asset_id: String, reason: String },

    /// Referenced queue entry does not exist
    #[error("Operation {0} not found in queue")]
    NotFound(OperationId),

    /// Referenced queue entry is being delivered right now
    #[error("Operation {0} is being delivered")]
    InFlight(OperationId),
}

impl SyncError {
    /// Whether the user has to act (free storage, reload, fix a payload)
    pub fn requires_user_action(&self) -> bool {
        matches!(
            self,
            SyncError::StorageUnavailable(_)
                | SyncError::QueueWriteFailed(_)
                | SyncError::RemoteRejected { .. }
        )
    }

    /// Recovery hint to show alongside the error
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            SyncError::StorageUnavailable(e) | SyncError::QueueWriteFailed(e) => {
                e.recovery_suggestion()
            }
            SyncError::RemoteRejected { .. } => {
                Some("Fix the rejected entry and retry it, or discard it.")
            }
            SyncError::InFlight(_) => Some("Wait for the running sync to finish, then retry."),
            _ => None,
        }
    }
}

fn body_suffix(body: &str) -> String {
    if body.is_empty() {
        String::new()
    } else {
        format!(": {}", body)
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
