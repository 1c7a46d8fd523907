//! Asset queue
//!
//! Pending binary uploads, kept apart from the operation queue because the
//! payloads are large and go through a separate upload call. An asset is
//! referenced by its temporary id (`asset_<uuid>`) until the upload
//! succeeds and the engine broadcasts the remote reference.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use crate::models::QueuedAsset;
use crate::storage::{Collection, DurableStore, StorageResult};

/// Prefix of temporary asset ids
pub const ASSET_ID_PREFIX: &str = "asset_";

/// Durable queue of pending binary uploads
#[derive(Clone)]
pub struct AssetQueue {
    store: Arc<DurableStore>,
}

impl AssetQueue {
    pub fn new(store: Arc<DurableStore>) -> Self {
        Self { store }
    }

    /// Capture a binary for later upload, returning its temporary id
    pub fn enqueue(
        &self,
        name: impl Into<String>,
        mime_type: impl Into<String>,
        content: Vec<u8>,
    ) -> SyncResult<String> {
        let asset = QueuedAsset {
            id: format!("{}{}", ASSET_ID_PREFIX, Uuid::new_v4().simple()),
            name: name.into(),
            mime_type: mime_type.into(),
            size_bytes: content.len() as u64,
            content,
            enqueued_at: Utc::now(),
            attempts: 0,
            last_attempt_at: None,
            last_error: None,
        };

        self.store
            .put(Collection::Assets, &asset.id, &asset)
            .map_err(SyncError::QueueWriteFailed)?;

        debug!(
            "Queued asset {} ({}, {} bytes)",
            asset.id, asset.mime_type, asset.size_bytes
        );
        Ok(asset.id)
    }

    pub fn get(&self, id: &str) -> StorageResult<Option<QueuedAsset>> {
        self.store.get(Collection::Assets, id)
    }

    /// All queued assets, oldest first
    pub fn list_pending(&self) -> StorageResult<Vec<QueuedAsset>> {
        self.store.get_all(Collection::Assets)
    }

    /// Record a failed upload; the asset stays queued
    pub fn mark_failed(&self, id: &str, error: &str) -> StorageResult<bool> {
        self.store.transaction(|tx| {
            let Some(mut asset) = tx.get::<QueuedAsset>(Collection::Assets, id)? else {
                return Ok(false);
            };
            asset.attempts += 1;
            asset.last_attempt_at = Some(Utc::now());
            asset.last_error = Some(error.to_string());
            tx.put(Collection::Assets, id, &asset)?;
            Ok(true)
        })
    }

    /// Remove an uploaded asset
    pub fn remove(&self, id: &str) -> StorageResult<bool> {
        self.store.delete(Collection::Assets, id)
    }

    pub fn len(&self) -> StorageResult<usize> {
        self.store.count(Collection::Assets, None)
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }
}

/// Whether a string looks like a temporary asset id
pub fn is_temp_asset_id(value: &str) -> bool {
    value.starts_with(ASSET_ID_PREFIX)
}
