//! Durable drain lease
//!
//! Foreground and background contexts share the store but not memory, so
//! single-flight across them is a record in the store: whoever holds a live
//! lease may drain. Acquisition is a compare-and-set inside an IMMEDIATE
//! transaction. A context that dies without releasing simply lets the lease
//! expire.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::storage::{Collection, DurableStore, Record, StorageResult};

/// Key of the single lease record
const LEASE_KEY: &str = "drain";

/// Default time a lease stays valid without renewal
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainLease {
    pub owner: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl DrainLease {
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

impl Record for DrainLease {}

/// Result of an acquisition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseAcquisition {
    Acquired(DrainLease),
    /// Another context holds a live lease
    HeldBy(DrainLease),
}

/// Acquires and maintains the lease on behalf of one engine context
pub struct LeaseManager {
    store: Arc<DurableStore>,
    owner: String,
    ttl: Duration,
}

impl LeaseManager {
    /// Manager with a fresh owner id
    pub fn new(store: Arc<DurableStore>, ttl: Duration) -> Self {
        Self {
            store,
            owner: Uuid::new_v4().to_string(),
            ttl,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Take the lease if it is free, expired or already ours
    pub fn acquire(&self) -> StorageResult<LeaseAcquisition> {
        let now = Utc::now();
        self.store.transaction(|tx| {
            if let Some(current) = tx.get::<DrainLease>(Collection::Leases, LEASE_KEY)? {
                if current.owner != self.owner && current.is_live_at(now) {
                    return Ok(LeaseAcquisition::HeldBy(current));
                }
            }

            let lease = DrainLease {
                owner: self.owner.clone(),
                acquired_at: now,
                expires_at: now + self.chrono_ttl(),
            };
            tx.put(Collection::Leases, LEASE_KEY, &lease)?;
            debug!("Drain lease acquired by {}", self.owner);
            Ok(LeaseAcquisition::Acquired(lease))
        })
    }

    /// Extend our lease; `false` if it was lost to another context
    pub fn renew(&self) -> StorageResult<bool> {
        let now = Utc::now();
        self.store.transaction(|tx| {
            let current = tx.get::<DrainLease>(Collection::Leases, LEASE_KEY)?;
            match current {
                Some(mut lease) if lease.owner == self.owner => {
                    lease.expires_at = now + self.chrono_ttl();
                    tx.put(Collection::Leases, LEASE_KEY, &lease)?;
                    Ok(true)
                }
                Some(other) if other.is_live_at(now) => Ok(false),
                _ => {
                    // Expired and taken over by nobody: reclaim it
                    let lease = DrainLease {
                        owner: self.owner.clone(),
                        acquired_at: now,
                        expires_at: now + self.chrono_ttl(),
                    };
                    tx.put(Collection::Leases, LEASE_KEY, &lease)?;
                    Ok(true)
                }
            }
        })
    }

    /// Drop the lease if we still hold it
    pub fn release(&self) -> StorageResult<bool> {
        self.store.transaction(|tx| {
            match tx.get::<DrainLease>(Collection::Leases, LEASE_KEY)? {
                Some(lease) if lease.owner == self.owner => {
                    tx.delete(Collection::Leases, LEASE_KEY)?;
                    debug!("Drain lease released by {}", self.owner);
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }

    /// Current lease record, live or not
    pub fn current(&self) -> StorageResult<Option<DrainLease>> {
        self.store.get(Collection::Leases, LEASE_KEY)
    }

    fn chrono_ttl(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::seconds(120))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> Arc<DurableStore> {
        Arc::new(DurableStore::open_in_memory().unwrap())
    }

    #[test]
    fn test_acquire_is_exclusive() {
        let store = store();
        let first = LeaseManager::new(Arc::clone(&store), DEFAULT_LEASE_TTL);
        let second = LeaseManager::new(Arc::clone(&store), DEFAULT_LEASE_TTL);

        assert!(matches!(first.acquire().unwrap(), LeaseAcquisition::Acquired(_)));
        match second.acquire().unwrap() {
            LeaseAcquisition::HeldBy(lease) => assert_eq!(lease.owner, first.owner()),
            other => panic!("expected HeldBy, got {:?}", other),
        }

        // Re-entrant for the holder
        assert!(matches!(first.acquire().unwrap(), LeaseAcquisition::Acquired(_)));
    }

    #[test]
    fn test_release_frees_lease() {
        let store = store();
        let first = LeaseManager::new(Arc::clone(&store), DEFAULT_LEASE_TTL);
        let second = LeaseManager::new(Arc::clone(&store), DEFAULT_LEASE_TTL);

        first.acquire().unwrap();
        assert!(!second.release().unwrap());
        assert!(first.release().unwrap());
        assert!(first.current().unwrap().is_none());

        assert!(matches!(second.acquire().unwrap(), LeaseAcquisition::Acquired(_)));
    }

    #[test]
    fn test_expired_lease_can_be_taken_over() {
        let store = store();
        let crashed = LeaseManager::new(Arc::clone(&store), Duration::ZERO);
        let survivor = LeaseManager::new(Arc::clone(&store), DEFAULT_LEASE_TTL);

        crashed.acquire().unwrap();
        assert!(matches!(survivor.acquire().unwrap(), LeaseAcquisition::Acquired(_)));

        // The original holder finds out at its next renewal
        assert!(!crashed.renew().unwrap());
        assert!(survivor.renew().unwrap());
    }

    #[test]
    fn test_lease_is_shared_across_connections() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("offsync.db");

        let foreground = LeaseManager::new(
            Arc::new(DurableStore::open_path(&path).unwrap()),
            DEFAULT_LEASE_TTL,
        );
        let background = LeaseManager::new(
            Arc::new(DurableStore::open_path(&path).unwrap()),
            DEFAULT_LEASE_TTL,
        );

        foreground.acquire().unwrap();
        assert!(matches!(background.acquire().unwrap(), LeaseAcquisition::HeldBy(_)));
        foreground.release().unwrap();
        assert!(matches!(background.acquire().unwrap(), LeaseAcquisition::Acquired(_)));
    }
}
