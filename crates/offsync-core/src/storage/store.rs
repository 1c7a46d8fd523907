//! Durable key/value store
//!
//! Named collections persisted in SQLite. Every operation runs inside a
//! scoped transaction: the closure's `Ok` commits, anything else (an `Err`,
//! an early return, a panic) drops the transaction and rolls it back, so a
//! failed `put` never leaves a partially written record.
//!
//! ## Usage
//!
//! ```ignore
//! let store = DurableStore::open(&config)?;
//!
//! store.put(Collection::Operations, "1", &operation)?;
//! let pending: Vec<QueuedOperation> =
//!     store.get_where(Collection::Operations, &IndexPredicate::eq("PENDING"))?;
//!
//! // Several writes, one commit
//! store.transaction(|tx| {
//!     tx.delete(Collection::Entities, "temp_1")?;
//!     tx.put(Collection::Entities, "member/42", &entity)
//! })?;
//! ```

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{
    params, params_from_iter, Connection, OpenFlags, OptionalExtension, TransactionBehavior,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::error::{StorageError, StorageResult};
use super::schema::{init_schema, needs_init};
use crate::config::Config;

/// How long a connection waits for another context's write lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Sequence backing the per-collection insertion order
const RECORD_SEQUENCE: &str = "records";

/// Logical collections in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    /// Queued mutating operations
    Operations,
    /// Queued binary uploads
    Assets,
    /// Cached entity snapshots (optimistic and reconciled)
    Entities,
    /// Temporary id -> server id mappings
    Aliases,
    /// Drain lease records
    Leases,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Operations => "operations",
            Collection::Assets => "assets",
            Collection::Entities => "entities",
            Collection::Aliases => "aliases",
            Collection::Leases => "leases",
        }
    }
}

/// A value that can live in a collection
///
/// `index_tag` feeds the secondary index used by [`IndexPredicate`].
pub trait Record: Serialize + DeserializeOwned {
    fn index_tag(&self) -> Option<String> {
        None
    }
}

/// Filter on a record's secondary index tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexPredicate {
    Eq(String),
    In(Vec<String>),
}

impl IndexPredicate {
    pub fn eq(tag: impl Into<String>) -> Self {
        IndexPredicate::Eq(tag.into())
    }

    pub fn any_of<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        IndexPredicate::In(tags.into_iter().map(Into::into).collect())
    }

    /// SQL condition and its bound values
    fn clause(&self) -> (String, Vec<String>) {
        match self {
            IndexPredicate::Eq(tag) => ("tag = ?".to_string(), vec![tag.clone()]),
            IndexPredicate::In(tags) if tags.is_empty() => ("0".to_string(), Vec::new()),
            IndexPredicate::In(tags) => {
                let placeholders = vec!["?"; tags.len()].join(", ");
                (format!("tag IN ({})", placeholders), tags.clone())
            }
        }
    }
}

/// Crash-surviving store addressed by named collections
pub struct DurableStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl DurableStore {
    /// Open the store at the configured database path
    pub fn open(config: &Config) -> StorageResult<Self> {
        Self::open_path(&config.database_path())
    }

    /// Open or create the database at `path`
    pub fn open_path(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| {
                    StorageError::CreateDirectory {
                        path: parent.to_path_buf(),
                        source,
                    }
                })?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        if needs_init(&conn) {
            init_schema(&conn)?;
        }

        debug!("Opened durable store at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open an existing database without write access
    ///
    /// Any write through this handle fails with [`StorageError::Unavailable`].
    pub fn open_read_only(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        if needs_init(&conn) {
            return Err(StorageError::Unavailable {
                details: format!("{:?} is not an initialized store", path),
            });
        }

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open an in-memory store (for testing)
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// Database file path, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` inside a write transaction
    ///
    /// The write lock is taken up front (IMMEDIATE), so read-check-write
    /// sequences inside `f` are atomic with respect to other connections.
    pub fn transaction<T, F>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&StoreTx<'_>) -> StorageResult<T>,
    {
        self.scoped(TransactionBehavior::Immediate, f)
    }

    /// Run `f` inside a read transaction
    pub fn read<T, F>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&StoreTx<'_>) -> StorageResult<T>,
    {
        self.scoped(TransactionBehavior::Deferred, f)
    }

    fn scoped<T, F>(&self, behavior: TransactionBehavior, f: F) -> StorageResult<T>
    where
        F: FnOnce(&StoreTx<'_>) -> StorageResult<T>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(behavior)?;
        let value = f(&StoreTx { conn: &*tx })?;
        tx.commit()?;
        Ok(value)
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }

    // ==================== Single-statement helpers ====================

    pub fn put<T: Record>(&self, collection: Collection, key: &str, value: &T) -> StorageResult<()> {
        self.transaction(|tx| tx.put(collection, key, value))
    }

    pub fn get<T: DeserializeOwned>(
        &self,
        collection: Collection,
        key: &str,
    ) -> StorageResult<Option<T>> {
        self.read(|tx| tx.get(collection, key))
    }

    pub fn get_all<T: DeserializeOwned>(&self, collection: Collection) -> StorageResult<Vec<T>> {
        self.read(|tx| tx.get_all(collection))
    }

    pub fn get_where<T: DeserializeOwned>(
        &self,
        collection: Collection,
        predicate: &IndexPredicate,
    ) -> StorageResult<Vec<T>> {
        self.read(|tx| tx.get_where(collection, predicate))
    }

    pub fn delete(&self, collection: Collection, key: &str) -> StorageResult<bool> {
        self.transaction(|tx| tx.delete(collection, key))
    }

    pub fn first_after<T: DeserializeOwned>(
        &self,
        collection: Collection,
        predicate: &IndexPredicate,
        after: Option<&str>,
    ) -> StorageResult<Option<T>> {
        self.read(|tx| tx.first_after(collection, predicate, after))
    }

    pub fn count(
        &self,
        collection: Collection,
        predicate: Option<&IndexPredicate>,
    ) -> StorageResult<usize> {
        self.read(|tx| tx.count(collection, predicate))
    }

    pub fn next_sequence(&self, name: &str) -> StorageResult<u64> {
        self.transaction(|tx| tx.next_sequence(name))
    }
}

/// Handle to an open transaction, passed to [`DurableStore::transaction`] closures
pub struct StoreTx<'conn> {
    conn: &'conn Connection,
}

impl StoreTx<'_> {
    /// Insert or replace a record
    ///
    /// Replacing keeps the record's original position in collection order.
    pub fn put<T: Record>(&self, collection: Collection, key: &str, value: &T) -> StorageResult<()> {
        let bytes = encode(collection, value)?;
        let tag = value.index_tag();
        let now = Utc::now().timestamp_millis();

        let updated = self.conn.execute(
            "UPDATE records SET tag = ?1, value = ?2, updated_at = ?3 \
             WHERE collection = ?4 AND key = ?5",
            params![tag, bytes, now, collection.as_str(), key],
        )?;

        if updated == 0 {
            let seq = self.next_sequence(RECORD_SEQUENCE)?;
            self.conn.execute(
                "INSERT INTO records (collection, key, seq, tag, value, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![collection.as_str(), key, seq as i64, tag, bytes, now],
            )?;
        }

        Ok(())
    }

    pub fn get<T: DeserializeOwned>(
        &self,
        collection: Collection,
        key: &str,
    ) -> StorageResult<Option<T>> {
        let bytes: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT value FROM records WHERE collection = ?1 AND key = ?2",
                params![collection.as_str(), key],
                |row| row.get(0),
            )
            .optional()?;

        bytes
            .map(|bytes| decode(collection, key, &bytes))
            .transpose()
    }

    /// All records in insertion order
    pub fn get_all<T: DeserializeOwned>(&self, collection: Collection) -> StorageResult<Vec<T>> {
        self.query_values(collection, None, None)
    }

    /// Records whose index tag matches `predicate`, in insertion order
    pub fn get_where<T: DeserializeOwned>(
        &self,
        collection: Collection,
        predicate: &IndexPredicate,
    ) -> StorageResult<Vec<T>> {
        self.query_values(collection, Some(predicate), None)
    }

    /// First matching record whose key sorts after `after`, in key order
    ///
    /// Only one row is decoded, so walking a collection with a key cursor
    /// stays linear.
    pub fn first_after<T: DeserializeOwned>(
        &self,
        collection: Collection,
        predicate: &IndexPredicate,
        after: Option<&str>,
    ) -> StorageResult<Option<T>> {
        Ok(self
            .query_values(collection, Some(predicate), Some(after.unwrap_or("")))?
            .into_iter()
            .next())
    }

    /// Delete a record, returning whether it existed
    pub fn delete(&self, collection: Collection, key: &str) -> StorageResult<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM records WHERE collection = ?1 AND key = ?2",
            params![collection.as_str(), key],
        )?;
        Ok(deleted > 0)
    }

    pub fn count(
        &self,
        collection: Collection,
        predicate: Option<&IndexPredicate>,
    ) -> StorageResult<usize> {
        let mut sql = String::from("SELECT COUNT(*) FROM records WHERE collection = ?");
        let mut args = vec![collection.as_str().to_string()];

        if let Some(predicate) = predicate {
            let (clause, tags) = predicate.clause();
            sql.push_str(" AND ");
            sql.push_str(&clause);
            args.extend(tags);
        }

        let count: i64 = self
            .conn
            .query_row(&sql, params_from_iter(args.iter()), |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Next value of a durable monotonic counter (starts at 1)
    pub fn next_sequence(&self, name: &str) -> StorageResult<u64> {
        self.conn.execute(
            "INSERT INTO sequences (name, value) VALUES (?1, 1) \
             ON CONFLICT(name) DO UPDATE SET value = value + 1",
            [name],
        )?;
        let value: i64 =
            self.conn
                .query_row("SELECT value FROM sequences WHERE name = ?1", [name], |row| {
                    row.get(0)
                })?;
        Ok(value as u64)
    }

    /// Matching records in insertion order, or with `after` the first
    /// record in key order past that key
    fn query_values<T: DeserializeOwned>(
        &self,
        collection: Collection,
        predicate: Option<&IndexPredicate>,
        after: Option<&str>,
    ) -> StorageResult<Vec<T>> {
        let mut sql = String::from("SELECT key, value FROM records WHERE collection = ?");
        let mut args = vec![collection.as_str().to_string()];

        if let Some(predicate) = predicate {
            let (clause, tags) = predicate.clause();
            sql.push_str(" AND ");
            sql.push_str(&clause);
            args.extend(tags);
        }
        match after {
            Some(cursor) => {
                sql.push_str(" AND key > ? ORDER BY key ASC LIMIT 1");
                args.push(cursor.to_string());
            }
            None => sql.push_str(" ORDER BY seq ASC"),
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;

        let mut values = Vec::new();
        for row in rows {
            let (key, bytes) = row?;
            values.push(decode(collection, &key, &bytes)?);
        }

        Ok(values)
    }
}

fn encode<T: Serialize>(collection: Collection, value: &T) -> StorageResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| StorageError::Encode {
        collection: collection.as_str(),
        details: e.to_string(),
    })?;
    Ok(buf)
}

fn decode<T: DeserializeOwned>(collection: Collection, key: &str, bytes: &[u8]) -> StorageResult<T> {
    ciborium::from_reader(bytes).map_err(|e| StorageError::Decode {
        collection: collection.as_str(),
        key: key.to_string(),
        details: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        name: String,
        state: String,
        #[serde(with = "serde_bytes")]
        blob: Vec<u8>,
    }

    impl Record for Item {
        fn index_tag(&self) -> Option<String> {
            Some(self.state.clone())
        }
    }

    fn item(name: &str, state: &str) -> Item {
        Item {
            name: name.to_string(),
            state: state.to_string(),
            blob: vec![0, 1, 2, 255],
        }
    }

    #[test]
    fn test_put_and_get() {
        let store = DurableStore::open_in_memory().unwrap();

        store.put(Collection::Assets, "a", &item("a", "new")).unwrap();

        let loaded: Item = store.get(Collection::Assets, "a").unwrap().unwrap();
        assert_eq!(loaded, item("a", "new"));

        let missing: Option<Item> = store.get(Collection::Assets, "b").unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_collections_are_isolated() {
        let store = DurableStore::open_in_memory().unwrap();

        store.put(Collection::Assets, "k", &item("asset", "x")).unwrap();
        store.put(Collection::Entities, "k", &item("entity", "x")).unwrap();

        let asset: Item = store.get(Collection::Assets, "k").unwrap().unwrap();
        assert_eq!(asset.name, "asset");
        assert_eq!(store.count(Collection::Entities, None).unwrap(), 1);
        assert_eq!(store.count(Collection::Operations, None).unwrap(), 0);
    }

    #[test]
    fn test_get_all_keeps_insertion_order_across_updates() {
        let store = DurableStore::open_in_memory().unwrap();

        for key in ["c", "a", "b"] {
            store.put(Collection::Assets, key, &item(key, "new")).unwrap();
        }
        // Rewriting a record must not move it to the back
        store.put(Collection::Assets, "c", &item("c", "done")).unwrap();

        let all: Vec<Item> = store.get_all(Collection::Assets).unwrap();
        let names: Vec<_> = all.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
        assert_eq!(all[0].state, "done");
    }

    #[test]
    fn test_index_predicates() {
        let store = DurableStore::open_in_memory().unwrap();

        store.put(Collection::Assets, "1", &item("1", "new")).unwrap();
        store.put(Collection::Assets, "2", &item("2", "old")).unwrap();
        store.put(Collection::Assets, "3", &item("3", "gone")).unwrap();

        let new_only = IndexPredicate::eq("new");
        assert_eq!(store.count(Collection::Assets, Some(&new_only)).unwrap(), 1);

        let some = IndexPredicate::any_of(["new", "gone"]);
        let matched: Vec<Item> = store.get_where(Collection::Assets, &some).unwrap();
        assert_eq!(matched.len(), 2);
        assert_eq!(matched[1].name, "3");

        let none = IndexPredicate::In(Vec::new());
        assert_eq!(store.count(Collection::Assets, Some(&none)).unwrap(), 0);
    }

    #[test]
    fn test_first_after_walks_keys() {
        let store = DurableStore::open_in_memory().unwrap();

        store.put(Collection::Operations, "03", &item("3", "new")).unwrap();
        store.put(Collection::Operations, "01", &item("1", "new")).unwrap();
        store.put(Collection::Operations, "02", &item("2", "gone")).unwrap();
        store.put(Collection::Operations, "04", &item("4", "new")).unwrap();

        let new = IndexPredicate::eq("new");
        let first: Item = store
            .first_after(Collection::Operations, &new, None)
            .unwrap()
            .unwrap();
        assert_eq!(first.name, "1");

        let next: Item = store
            .first_after(Collection::Operations, &new, Some("01"))
            .unwrap()
            .unwrap();
        assert_eq!(next.name, "3");

        let last: Option<Item> = store
            .first_after(Collection::Operations, &new, Some("04"))
            .unwrap();
        assert!(last.is_none());
    }

    #[test]
    fn test_delete() {
        let store = DurableStore::open_in_memory().unwrap();
        store.put(Collection::Assets, "a", &item("a", "new")).unwrap();

        assert!(store.delete(Collection::Assets, "a").unwrap());
        assert!(!store.delete(Collection::Assets, "a").unwrap());
        assert_eq!(store.count(Collection::Assets, None).unwrap(), 0);
    }

    #[test]
    fn test_failed_transaction_rolls_back() {
        let store = DurableStore::open_in_memory().unwrap();
        store.put(Collection::Assets, "keep", &item("keep", "new")).unwrap();

        let result: StorageResult<()> = store.transaction(|tx| {
            tx.put(Collection::Assets, "partial", &item("partial", "new"))?;
            tx.delete(Collection::Assets, "keep")?;
            Err(StorageError::Unavailable {
                details: "simulated".to_string(),
            })
        });

        assert!(result.is_err());
        let all: Vec<Item> = store.get_all(Collection::Assets).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "keep");
    }

    #[test]
    fn test_sequences_are_monotonic_and_durable() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store.db");

        {
            let store = DurableStore::open_path(&path).unwrap();
            assert_eq!(store.next_sequence("temp").unwrap(), 1);
            assert_eq!(store.next_sequence("temp").unwrap(), 2);
            assert_eq!(store.next_sequence("other").unwrap(), 1);
        }

        let store = DurableStore::open_path(&path).unwrap();
        assert_eq!(store.next_sequence("temp").unwrap(), 3);
    }

    #[test]
    fn test_records_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("store.db");

        {
            let store = DurableStore::open_path(&path).unwrap();
            store.put(Collection::Assets, "a", &item("a", "new")).unwrap();
        }

        let store = DurableStore::open_path(&path).unwrap();
        let loaded: Item = store.get(Collection::Assets, "a").unwrap().unwrap();
        assert_eq!(loaded.blob, vec![0, 1, 2, 255]);
    }

    #[test]
    fn test_read_only_store_rejects_writes() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store.db");

        let writable = DurableStore::open_path(&path).unwrap();
        writable.put(Collection::Assets, "a", &item("a", "new")).unwrap();

        let read_only = DurableStore::open_read_only(&path).unwrap();
        let loaded: Option<Item> = read_only.get(Collection::Assets, "a").unwrap();
        assert!(loaded.is_some());

        let err = read_only
            .put(Collection::Assets, "b", &item("b", "new"))
            .unwrap_err();
        assert!(err.is_unavailable());
    }

    #[test]
    fn test_read_only_requires_initialized_store() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("empty.db");
        Connection::open(&path).unwrap();

        let err = DurableStore::open_read_only(&path).err().unwrap();
        assert!(matches!(err, StorageError::Unavailable { .. }));
    }
}
