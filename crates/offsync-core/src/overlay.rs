//! Optimistic overlay
//!
//! Entities created while offline are stored locally under a temporary id
//! (`temp_<n>`) and marked pending, so UI code can show them at once. When
//! the CREATE is acknowledged the entity is re-keyed to `kind/server_id`
//! (server ids are only unique per kind), and every queued operation or
//! cached entity still naming the temporary id is rewritten. An alias keeps
//! old references resolvable.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::events::{Notifier, SyncEvent};
use crate::models::{
    entity_key, EntityAlias, EntitySyncStatus, Method, NewOperation, OperationId,
    OptimisticEntity, QueuedOperation,
};
use crate::patch::{id_to_key, patch_payload, replace_json_value, rewrite_path};
use crate::queue::OperationQueue;
use crate::storage::{Collection, DurableStore, IndexPredicate, StorageResult, StoreTx};
use crate::sync::RemoteResponse;

/// Prefix of temporary entity ids
pub const TEMP_ID_PREFIX: &str = "temp_";

/// Durable counter behind temporary ids, so they never repeat across restarts
const TEMP_ID_SEQUENCE: &str = "temp_ids";

/// A temporary id resolved to its server id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remap {
    pub temp_id: String,
    pub server_id: String,
}

/// Local view of entities not yet (or just) confirmed by the server
#[derive(Clone)]
pub struct OptimisticOverlay {
    store: Arc<DurableStore>,
    events: Notifier<SyncEvent>,
}

impl OptimisticOverlay {
    pub fn new(store: Arc<DurableStore>, events: Notifier<SyncEvent>) -> Self {
        Self { store, events }
    }

    /// Store a pending entity and queue its CREATE in one transaction
    pub fn create_optimistic(
        &self,
        kind: &str,
        target_path: &str,
        payload: &Value,
    ) -> SyncResult<(OptimisticEntity, OperationId)> {
        let (entity, operation) = self
            .store
            .transaction(|tx| {
                let temp_id = format!("{}{}", TEMP_ID_PREFIX, tx.next_sequence(TEMP_ID_SEQUENCE)?);
                let entity = OptimisticEntity {
                    id: temp_id.clone(),
                    kind: kind.to_string(),
                    payload: payload.clone(),
                    sync_status: EntitySyncStatus::Pending,
                    created_at: Utc::now(),
                    synced_at: None,
                    temp_id: Some(temp_id.clone()),
                };
                tx.put(Collection::Entities, &temp_id, &entity)?;

                let operation = OperationQueue::enqueue_in(
                    tx,
                    NewOperation::json(Method::Create, target_path, kind, payload)
                        .with_entity_ref(temp_id),
                )?;
                Ok((entity, operation))
            })
            .map_err(SyncError::QueueWriteFailed)?;

        debug!(
            "Created optimistic {} {} (operation {})",
            entity.kind, entity.id, operation.id
        );
        Ok((entity, operation.id))
    }

    /// Apply a successful CREATE response to the entity it materialises
    ///
    /// Returns the remap, or `None` when the operation carries no entity or
    /// the response has no usable `id`.
    pub fn reconcile(
        &self,
        operation: &QueuedOperation,
        response: &RemoteResponse,
    ) -> SyncResult<Option<Remap>> {
        let remap = self
            .store
            .transaction(|tx| Self::reconcile_in(tx, operation, response))?;
        if let Some(ref remap) = remap {
            self.announce(remap);
        }
        Ok(remap)
    }

    pub(crate) fn reconcile_in(
        tx: &StoreTx<'_>,
        operation: &QueuedOperation,
        response: &RemoteResponse,
    ) -> StorageResult<Option<Remap>> {
        if operation.method != Method::Create {
            return Ok(None);
        }
        let Some(ref temp_id) = operation.entity_ref else {
            return Ok(None);
        };

        let body = response.body_json();
        let server_value = body.as_ref().and_then(|b| b.get("id")).cloned();
        let Some(server_id) = server_value.as_ref().and_then(id_to_key) else {
            warn!(
                "Response to operation {} has no id; {} stays pending",
                operation.id, temp_id
            );
            return Ok(None);
        };
        let server_value = server_value.unwrap_or(Value::Null);

        let Some(mut entity) = tx.get::<OptimisticEntity>(Collection::Entities, temp_id)? else {
            debug!("{} already reconciled", temp_id);
            return Ok(None);
        };

        if let (Value::Object(fields), Some(Value::Object(confirmed))) = (&mut entity.payload, body)
        {
            for (field, value) in confirmed {
                if field != "id" {
                    fields.insert(field, value);
                }
            }
        }
        entity.id = server_id.clone();
        entity.sync_status = EntitySyncStatus::Synced;
        entity.synced_at = Some(Utc::now());
        entity.temp_id = Some(temp_id.clone());

        tx.delete(Collection::Entities, temp_id)?;
        tx.put(Collection::Entities, &entity.storage_key(), &entity)?;
        tx.put(
            Collection::Aliases,
            temp_id,
            &EntityAlias {
                temp_id: temp_id.clone(),
                server_id: server_id.clone(),
                kind: entity.kind.clone(),
            },
        )?;

        let patched = Self::patch_references_in(tx, temp_id, &server_value, Some(&server_id))?;
        debug!("{} -> {} ({} references rewritten)", temp_id, server_id, patched);

        Ok(Some(Remap {
            temp_id: temp_id.clone(),
            server_id,
        }))
    }

    /// Replace a temporary asset id with its remote reference everywhere
    pub fn resolve_asset(&self, temp_asset_id: &str, remote_ref: &str) -> SyncResult<usize> {
        Ok(self
            .store
            .transaction(|tx| Self::resolve_asset_in(tx, temp_asset_id, remote_ref))?)
    }

    pub(crate) fn resolve_asset_in(
        tx: &StoreTx<'_>,
        temp_asset_id: &str,
        remote_ref: &str,
    ) -> StorageResult<usize> {
        Self::patch_references_in(tx, temp_asset_id, &Value::from(remote_ref), None)
    }

    /// Look up an entity by storage key or by the temporary id it had
    ///
    /// A reconciled entity is found through its old temporary id or its
    /// `kind/server_id` key; see [`Self::get_synced`].
    pub fn get(&self, id: &str) -> StorageResult<Option<OptimisticEntity>> {
        self.store.read(|tx| {
            if let Some(entity) = tx.get(Collection::Entities, id)? {
                return Ok(Some(entity));
            }
            match tx.get::<EntityAlias>(Collection::Aliases, id)? {
                Some(alias) => tx.get(Collection::Entities, &alias.entity_key()),
                None => Ok(None),
            }
        })
    }

    /// Reconciled entity of `kind` with server id `server_id`
    pub fn get_synced(
        &self,
        kind: &str,
        server_id: &str,
    ) -> StorageResult<Option<OptimisticEntity>> {
        self.store
            .get(Collection::Entities, &entity_key(kind, server_id))
    }

    /// Server id a temporary id was reconciled to
    pub fn resolve_id(&self, temp_id: &str) -> StorageResult<Option<String>> {
        Ok(self
            .store
            .get::<EntityAlias>(Collection::Aliases, temp_id)?
            .map(|alias| alias.server_id))
    }

    /// Cached entities, optionally of one kind, in creation order
    pub fn list(&self, kind: Option<&str>) -> StorageResult<Vec<OptimisticEntity>> {
        let entities: Vec<OptimisticEntity> = self.store.get_all(Collection::Entities)?;
        Ok(entities
            .into_iter()
            .filter(|entity| kind.map_or(true, |k| entity.kind == k))
            .collect())
    }

    /// Entities still waiting for their CREATE to be acknowledged
    pub fn list_pending(&self) -> StorageResult<Vec<OptimisticEntity>> {
        self.store.get_where(
            Collection::Entities,
            &IndexPredicate::eq(EntitySyncStatus::Pending.as_str()),
        )
    }

    pub(crate) fn announce(&self, remap: &Remap) {
        info!("Entity {} is now {}", remap.temp_id, remap.server_id);
        self.events.emit(&SyncEvent::EntityRemapped {
            temp_id: remap.temp_id.clone(),
            server_id: remap.server_id.clone(),
        });
    }

    /// Rewrite queued operations and cached entities that mention `from`
    ///
    /// Target paths are only rewritten when `path_segment` is given.
    fn patch_references_in(
        tx: &StoreTx<'_>,
        from: &str,
        to: &Value,
        path_segment: Option<&str>,
    ) -> StorageResult<usize> {
        let mut patched = 0;

        let operations: Vec<QueuedOperation> = tx.get_all(Collection::Operations)?;
        for mut operation in operations {
            let mut changed = false;
            if let Some(segment) = path_segment {
                if let Some(path) = rewrite_path(&operation.target_path, from, segment) {
                    operation.target_path = path;
                    changed = true;
                }
            }
            if let Some(payload) = patch_payload(&operation.payload, from, to) {
                operation.payload = payload;
                changed = true;
            }
            if changed {
                tx.put(
                    Collection::Operations,
                    &QueuedOperation::key(operation.id),
                    &operation,
                )?;
                patched += 1;
            }
        }

        let entities: Vec<OptimisticEntity> = tx.get_all(Collection::Entities)?;
        for mut entity in entities {
            if replace_json_value(&mut entity.payload, from, to) > 0 {
                tx.put(Collection::Entities, &entity.storage_key(), &entity)?;
                patched += 1;
            }
        }

        Ok(patched)
    }
}

/// Whether a string looks like a temporary entity id
pub fn is_temp_id(value: &str) -> bool {
    value.starts_with(TEMP_ID_PREFIX)
}
