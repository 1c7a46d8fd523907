//! Storage error handling
//!
//! Provides typed errors for durable store operations with descriptive
//! messages and recovery suggestions.

use std::io;
use std::path::PathBuf;

use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// Failed to create data directory
    #[error("Failed to create data directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Disk is full or quota exceeded
    #[error("Disk full or quota exceeded: {details}. Free up disk space and try again.")]
    DiskFull { details: String },

    /// Database file is corrupted or not a database
    #[error("Database is corrupted: {details}")]
    Corrupt { details: String },

    /// Storage cannot be opened or written (read-only, I/O failure, permissions)
    #[error("Storage unavailable: {details}")]
    Unavailable { details: String },

    /// A record could not be encoded for storage
    #[error("Failed to encode record for '{collection}': {details}")]
    Encode {
        collection: &'static str,
        details: String,
    },

    /// A stored record could not be decoded
    #[error("Failed to decode record '{key}' in '{collection}': {details}")]
    Decode {
        collection: &'static str,
        key: String,
        details: String,
    },

    /// A previous holder of the connection panicked mid-transaction
    #[error("Storage connection lock poisoned")]
    Poisoned,

    /// Any other SQLite error
    #[error("Database error: {0}")]
    Database(rusqlite::Error),
}

impl From<rusqlite::Error> for StorageError {
    /// Classifies SQLite failures by result code so callers can tell a
    /// compromised store apart from an ordinary query error.
    fn from(error: rusqlite::Error) -> Self {
        let details = error.to_string();
        match error.sqlite_error_code() {
            Some(ErrorCode::DiskFull) => StorageError::DiskFull { details },
            Some(ErrorCode::DatabaseCorrupt) | Some(ErrorCode::NotADatabase) => {
                StorageError::Corrupt { details }
            }
            Some(ErrorCode::CannotOpen)
            | Some(ErrorCode::ReadOnly)
            | Some(ErrorCode::SystemIoFailure)
            | Some(ErrorCode::PermissionDenied) => StorageError::Unavailable { details },
            _ => StorageError::Database(error),
        }
    }
}

impl StorageError {
    /// Check if the store itself is compromised (as opposed to a single bad record)
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            StorageError::CreateDirectory { .. }
                | StorageError::DiskFull { .. }
                | StorageError::Corrupt { .. }
                | StorageError::Unavailable { .. }
                | StorageError::Poisoned
        )
    }

    /// Check if this error is recoverable by user action
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StorageError::DiskFull { .. }
                | StorageError::Unavailable { .. }
                | StorageError::CreateDirectory { .. }
        )
    }

    /// Get a recovery suggestion for this error
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            StorageError::DiskFull { .. } => Some("Free up disk space and try again."),
            StorageError::Unavailable { .. } => {
                Some("Check that the data directory is writable and not mounted read-only, then reload.")
            }
            StorageError::Corrupt { .. } => {
                Some("Move the database file aside and restart. Queued work in the damaged file must be recovered manually.")
            }
            StorageError::CreateDirectory { .. } => {
                Some("Check that the parent directory exists and you have write permissions.")
            }
            _ => None,
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_failure(code: ErrorCode, extended: i32) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code,
                extended_code: extended,
            },
            None,
        )
    }

    #[test]
    fn test_disk_full_classification() {
        let err = StorageError::from(sqlite_failure(ErrorCode::DiskFull, 13));

        assert!(matches!(err, StorageError::DiskFull { .. }));
        assert!(err.is_unavailable());
        assert!(err.is_recoverable());
        assert!(err.recovery_suggestion().is_some());
    }

    #[test]
    fn test_corrupt_classification() {
        let err = StorageError::from(sqlite_failure(ErrorCode::NotADatabase, 26));

        assert!(matches!(err, StorageError::Corrupt { .. }));
        assert!(err.is_unavailable());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_read_only_classification() {
        let err = StorageError::from(sqlite_failure(ErrorCode::ReadOnly, 8));
        assert!(matches!(err, StorageError::Unavailable { .. }));
    }

    #[test]
    fn test_query_error_is_not_unavailable() {
        let err = StorageError::from(rusqlite::Error::QueryReturnedNoRows);

        assert!(matches!(err, StorageError::Database(_)));
        assert!(!err.is_unavailable());
        assert!(err.recovery_suggestion().is_none());
    }

    #[test]
    fn test_error_display() {
        let err = StorageError::Decode {
            collection: "operations",
            key: "7".to_string(),
            details: "unexpected end of input".to_string(),
        };

        let msg = err.to_string();
        assert!(msg.contains("operations"));
        assert!(msg.contains("'7'"));
    }
}
