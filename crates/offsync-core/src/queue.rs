//! Operation queue
//!
//! Durable FIFO of mutating calls that have not been acknowledged by the
//! server. Every method goes straight to the store; there is no in-memory
//! copy, so listing is restartable and always reflects committed state.
//!
//! Status flow:
//!
//! ```text
//! enqueue -> PENDING -> PROCESSING -> (removed on success)
//!                                  -> FAILED   -> PROCESSING (next drain)
//!                                  -> REJECTED -> PENDING (manual retry) | removed (discard)
//! ```

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::models::{
    Method, NewOperation, OperationId, OperationStatus, OptimisticEntity, QueuedOperation,
};
use crate::storage::{Collection, DurableStore, IndexPredicate, StorageResult, StoreTx};

/// Durable counter backing operation ids
const OPERATION_SEQUENCE: &str = "operations";

/// Number of queued operations per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub processing: usize,
    pub failed: usize,
    pub rejected: usize,
}

impl QueueCounts {
    pub fn total(&self) -> usize {
        self.pending + self.processing + self.failed + self.rejected
    }

    /// Entries the automatic retry path will attempt
    pub fn retryable(&self) -> usize {
        self.pending + self.failed
    }
}

/// Durable queue of not-yet-acknowledged operations
#[derive(Clone)]
pub struct OperationQueue {
    store: Arc<DurableStore>,
}

impl OperationQueue {
    pub fn new(store: Arc<DurableStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<DurableStore> {
        &self.store
    }

    /// Append an operation with status PENDING
    ///
    /// The entry is committed before this returns. On failure the caller
    /// gets [`SyncError::QueueWriteFailed`] and must not assume the write
    /// will happen.
    pub fn enqueue(&self, operation: NewOperation) -> SyncResult<OperationId> {
        let queued = self
            .store
            .transaction(|tx| Self::enqueue_in(tx, operation))
            .map_err(SyncError::QueueWriteFailed)?;

        debug!(
            "Queued {} {} as operation {}",
            queued.method, queued.target_path, queued.id
        );
        Ok(queued.id)
    }

    /// Enqueue inside an existing transaction
    pub(crate) fn enqueue_in(
        tx: &StoreTx<'_>,
        operation: NewOperation,
    ) -> StorageResult<QueuedOperation> {
        let id = tx.next_sequence(OPERATION_SEQUENCE)?;
        let queued = QueuedOperation {
            id,
            target_path: operation.target_path,
            method: operation.method,
            payload: operation.payload,
            enqueued_at: Utc::now(),
            status: OperationStatus::Pending,
            last_attempt_at: None,
            kind: operation.kind,
            attempts: 0,
            last_error: None,
            entity_ref: operation.entity_ref,
        };
        tx.put(Collection::Operations, &QueuedOperation::key(id), &queued)?;
        Ok(queued)
    }

    pub fn get(&self, id: OperationId) -> StorageResult<Option<QueuedOperation>> {
        self.store
            .get(Collection::Operations, &QueuedOperation::key(id))
    }

    /// PENDING and FAILED entries, oldest first
    pub fn list_pending(&self) -> StorageResult<Vec<QueuedOperation>> {
        self.store.get_where(
            Collection::Operations,
            &IndexPredicate::any_of(OperationStatus::retryable().iter().map(|s| s.as_str())),
        )
    }

    /// Oldest retryable entry enqueued after `after`
    ///
    /// Re-queries the store on every call, so entries enqueued while a
    /// drain is running are seen by that drain.
    pub fn next_pending(&self, after: Option<OperationId>) -> StorageResult<Option<QueuedOperation>> {
        let cursor = after.map(QueuedOperation::key);
        self.store.first_after(
            Collection::Operations,
            &IndexPredicate::any_of(OperationStatus::retryable().iter().map(|s| s.as_str())),
            cursor.as_deref(),
        )
    }

    /// Entries refused by the server, awaiting manual resolution
    pub fn list_rejected(&self) -> StorageResult<Vec<QueuedOperation>> {
        self.store.get_where(
            Collection::Operations,
            &IndexPredicate::eq(OperationStatus::Rejected.as_str()),
        )
    }

    /// Every entry regardless of status, oldest first
    pub fn list_all(&self) -> StorageResult<Vec<QueuedOperation>> {
        self.store.get_all(Collection::Operations)
    }

    /// Record a delivery attempt
    ///
    /// Returns `false` (and changes nothing) when the entry is gone or no
    /// longer retryable, e.g. another context already delivered it.
    pub fn mark_processing(&self, id: OperationId) -> StorageResult<bool> {
        self.update(id, |op| {
            if !matches!(
                op.status,
                OperationStatus::Pending | OperationStatus::Failed
            ) {
                return false;
            }
            op.status = OperationStatus::Processing;
            op.attempts += 1;
            op.last_attempt_at = Some(Utc::now());
            true
        })
    }

    pub fn mark_failed(&self, id: OperationId, error: &str) -> StorageResult<bool> {
        self.update(id, |op| {
            op.status = OperationStatus::Failed;
            op.last_error = Some(error.to_string());
            true
        })
    }

    /// Move an entry out of the automatic retry path
    pub fn mark_rejected(&self, id: OperationId, error: &str) -> StorageResult<bool> {
        self.update(id, |op| {
            op.status = OperationStatus::Rejected;
            op.last_error = Some(error.to_string());
            true
        })
    }

    /// Remove an acknowledged entry
    pub fn remove(&self, id: OperationId) -> StorageResult<bool> {
        self.store
            .delete(Collection::Operations, &QueuedOperation::key(id))
    }

    /// Treat entries left PROCESSING by a crashed or cancelled context as FAILED
    ///
    /// Nobody knows whether those were delivered, so they are retried:
    /// delivery is at-least-once.
    pub fn recover_abandoned(&self) -> StorageResult<usize> {
        let recovered = self.store.transaction(|tx| {
            let abandoned: Vec<QueuedOperation> = tx.get_where(
                Collection::Operations,
                &IndexPredicate::eq(OperationStatus::Processing.as_str()),
            )?;
            for mut op in abandoned.iter().cloned() {
                op.status = OperationStatus::Failed;
                op.last_error = Some("interrupted before a response was recorded".to_string());
                tx.put(Collection::Operations, &QueuedOperation::key(op.id), &op)?;
            }
            Ok(abandoned.len())
        })?;

        if recovered > 0 {
            warn!("Recovered {} abandoned in-flight operation(s)", recovered);
        }
        Ok(recovered)
    }

    /// Put a FAILED or REJECTED entry back on the retry path
    ///
    /// An entry some context is delivering right now is left alone
    /// ([`SyncError::InFlight`]); resetting it would send it twice.
    pub fn retry(&self, id: OperationId) -> SyncResult<()> {
        let key = QueuedOperation::key(id);
        let previous = self.store.transaction(|tx| {
            let Some(mut op) = tx.get::<QueuedOperation>(Collection::Operations, &key)? else {
                return Ok(None);
            };
            let previous = op.status;
            if previous != OperationStatus::Processing {
                op.status = OperationStatus::Pending;
                op.last_error = None;
                tx.put(Collection::Operations, &key, &op)?;
            }
            Ok(Some(previous))
        })?;

        match previous {
            None => Err(SyncError::NotFound(id)),
            Some(OperationStatus::Processing) => Err(SyncError::InFlight(id)),
            Some(_) => {
                info!("Operation {} returned to the retry path", id);
                Ok(())
            }
        }
    }

    /// Drop an entry without delivering it
    ///
    /// Discarding an optimistic CREATE also drops the pending entity it
    /// would have materialised, in the same transaction.
    pub fn discard(&self, id: OperationId) -> SyncResult<()> {
        let key = QueuedOperation::key(id);
        let found = self.store.transaction(|tx| {
            let Some(op) = tx.get::<QueuedOperation>(Collection::Operations, &key)? else {
                return Ok(false);
            };
            tx.delete(Collection::Operations, &key)?;

            if op.method == Method::Create {
                if let Some(ref temp_id) = op.entity_ref {
                    let pending = tx
                        .get::<OptimisticEntity>(Collection::Entities, temp_id)?
                        .filter(OptimisticEntity::is_pending);
                    if pending.is_some() {
                        tx.delete(Collection::Entities, temp_id)?;
                        debug!("Dropped pending entity {} with its CREATE", temp_id);
                    }
                }
            }
            Ok(true)
        })?;

        if !found {
            return Err(SyncError::NotFound(id));
        }
        info!("Operation {} discarded", id);
        Ok(())
    }

    pub fn counts(&self) -> StorageResult<QueueCounts> {
        self.store.read(|tx| {
            let count = |status: OperationStatus| {
                tx.count(
                    Collection::Operations,
                    Some(&IndexPredicate::eq(status.as_str())),
                )
            };
            Ok(QueueCounts {
                pending: count(OperationStatus::Pending)?,
                processing: count(OperationStatus::Processing)?,
                failed: count(OperationStatus::Failed)?,
                rejected: count(OperationStatus::Rejected)?,
            })
        })
    }

    pub fn len(&self) -> StorageResult<usize> {
        self.store.count(Collection::Operations, None)
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Read-modify-write of one entry in a single transaction
    ///
    /// `f` returns whether to write the entry back.
    fn update<F>(&self, id: OperationId, f: F) -> StorageResult<bool>
    where
        F: FnOnce(&mut QueuedOperation) -> bool,
    {
        let key = QueuedOperation::key(id);
        self.store.transaction(|tx| {
            let Some(mut op) = tx.get::<QueuedOperation>(Collection::Operations, &key)? else {
                return Ok(false);
            };
            if !f(&mut op) {
                return Ok(false);
            }
            tx.put(Collection::Operations, &key, &op)?;
            Ok(true)
        })
    }
}
