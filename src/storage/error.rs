//! Storage layer error types
//!
//! All errors that can occur while talking to the object store or the ref
//! database are defined here. Driver errors from `rusqlite` are wrapped at
//! the component boundary and never leak out as a bare driver type.

use rusqlite::ErrorCode;
use thiserror::Error;

use crate::storage::types::{InvalidIdError, InvalidNameError, ObjectId, ObjectKind};

/// the main error type for storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// error from the underlying SQL driver
    #[error("sql error: {0}")]
    Sql(#[from] rusqlite::Error),

    /// I/O error while reading an object payload from its source
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// the byte source ended before the declared object length
    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: u64, actual: u64 },

    /// no object is stored under the requested id
    #[error("missing {} object: {id}", kind_display(.type_hint))]
    MissingObject {
        id: ObjectId,
        type_hint: Option<ObjectKind>,
    },

    /// no object matches an abbreviated id
    #[error("no object matches prefix {0}")]
    UnresolvedPrefix(String),

    /// more than one object matches an abbreviated id
    #[error("ambiguous prefix {prefix}: {} candidates", .candidates.len())]
    AmbiguousPrefix {
        prefix: String,
        candidates: Vec<ObjectId>,
    },

    /// a symbolic ref points at a ref that does not exist
    #[error("broken symbolic ref: {name} -> {target}: target not found")]
    BrokenSymbolicRef { name: String, target: String },

    /// symbolic refs form a loop
    #[error("cyclic symbolic ref: {}", .chain.join(" -> "))]
    CyclicReference { chain: Vec<String> },

    /// symbolic chain is longer than we are willing to follow
    #[error("symbolic ref {name} exceeds the maximum depth of {max_depth}")]
    SymbolicDepthExceeded { name: String, max_depth: usize },

    /// a malformed object id or prefix
    #[error("invalid object id: {0}")]
    InvalidObjectId(#[from] InvalidIdError),

    /// a malformed reference name
    #[error("invalid ref name: {0}")]
    InvalidName(#[from] InvalidNameError),

    /// a stored row carries a type code we do not know
    #[error("unknown object type code {code} for {id}")]
    UnknownObjectType { id: String, code: i64 },

    /// a ref update was used incorrectly
    #[error("invalid ref update for {name}: {reason}")]
    InvalidUpdate { name: String, reason: String },

    /// the requested repository layout is not supported
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// stored data failed an integrity check
    #[error("corrupted data in {table}: {reason}")]
    CorruptedData { table: &'static str, reason: String },
}

fn kind_display(kind: &Option<ObjectKind>) -> &'static str {
    kind.map(ObjectKind::type_name).unwrap_or("any")
}

impl StorageError {
    /// check if this error indicates the resource doesn't exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::MissingObject { .. }
                | StorageError::UnresolvedPrefix(_)
                | StorageError::BrokenSymbolicRef { .. }
        )
    }

    /// check if this error is a uniqueness or consistency conflict
    pub fn is_conflict(&self) -> bool {
        match self {
            StorageError::AmbiguousPrefix { .. } => true,
            StorageError::Sql(e) => e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation),
            _ => false,
        }
    }

    /// check if this error means the connection itself is unusable
    ///
    /// Bulk callers keep going past per-object failures but stop on these.
    pub fn is_connection_failure(&self) -> bool {
        match self {
            StorageError::Sql(e) => matches!(
                e.sqlite_error_code(),
                Some(
                    ErrorCode::CannotOpen
                        | ErrorCode::NotADatabase
                        | ErrorCode::DatabaseCorrupt
                        | ErrorCode::SystemIoFailure
                        | ErrorCode::DiskFull
                        | ErrorCode::PermissionDenied
                        | ErrorCode::ReadOnly
                )
            ),
            _ => false,
        }
    }
}

/// result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_failure(code: i32) -> StorageError {
        StorageError::Sql(rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(code), None))
    }

    #[test]
    fn test_error_classification() {
        let missing = StorageError::MissingObject {
            id: ObjectId::zero(),
            type_hint: Some(ObjectKind::Blob),
        };
        assert!(missing.is_not_found());
        assert!(!missing.is_conflict());
        assert!(!missing.is_connection_failure());

        let ambiguous = StorageError::AmbiguousPrefix {
            prefix: "ab".into(),
            candidates: vec![ObjectId::zero()],
        };
        assert!(ambiguous.is_conflict());
        assert!(!ambiguous.is_not_found());
    }

    #[test]
    fn test_sql_classification() {
        let constraint = sqlite_failure(rusqlite::ffi::SQLITE_CONSTRAINT);
        assert!(constraint.is_conflict());
        assert!(!constraint.is_connection_failure());

        let cannot_open = sqlite_failure(rusqlite::ffi::SQLITE_CANTOPEN);
        assert!(cannot_open.is_connection_failure());
    }

    #[test]
    fn test_messages() {
        let missing = StorageError::MissingObject {
            id: ObjectId::zero(),
            type_hint: None,
        };
        assert_eq!(
            missing.to_string(),
            format!("missing any object: {}", "0".repeat(40))
        );

        let cycle = StorageError::CyclicReference {
            chain: vec!["HEAD".into(), "refs/heads/a".into(), "HEAD".into()],
        };
        assert_eq!(cycle.to_string(), "cyclic symbolic ref: HEAD -> refs/heads/a -> HEAD");
    }
}
