//! Storage layer
//!
//! Durable, crash-surviving persistence for the sync engine.
//!
//! ## Architecture
//!
//! - **SQLite**: single database file, one `records` table shared by all
//!   collections, plus durable counters
//! - **CBOR**: record values are encoded with ciborium
//!
//! Nothing above this layer caches a mutable copy of stored state; every
//! reader goes back to the store.

pub mod error;
pub mod schema;
pub mod store;

pub use error::{StorageError, StorageResult};
pub use schema::{init_schema, needs_init, SCHEMA_VERSION};
pub use store::{Collection, DurableStore, IndexPredicate, Record, StoreTx};
