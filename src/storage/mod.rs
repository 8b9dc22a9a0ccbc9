//! storage layer for gitsql
//!
//! Git objects and references persisted in two SQL tables. Objects are
//! content addressed (SHA-1 over `"<type> <len>\0" + payload`, payload only
//! stored); refs are rows that either name an object or link to another ref.
//!
//!  # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       SqlRepository                         │
//! │      (owns the connection, bootstraps schema and HEAD)      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!            ┌─────────────────┴─────────────────┐
//!            ▼                                   ▼
//!  ┌───────────────────┐               ┌───────────────────┐
//!  │ SqlObjectDatabase │               │  SqlRefDatabase   │
//!  │  (objects table)  │               │   (refs table)    │
//!  └───────────────────┘               └───────────────────┘
//!       │          │                             │
//!       ▼          ▼                             ▼
//!  ObjectWriter  ObjectReader ──► loader    RefUpdate
//!  (batched)     (prefix lookup)  (lazy)    (conditioned writes)
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use gitsql::db::RepositoryConfig;
//! use gitsql::storage::{ObjectInserter, ObjectKind, SqlRepository};
//!
//! let repo = SqlRepository::open(RepositoryConfig::new("repo.db"))?;
//!
//! let mut writer = repo.new_object_writer();
//! let id = writer.insert_bytes(ObjectKind::Blob, b"hello world\n")?;
//! writer.close()?;
//!
//! let mut update = repo.update_ref("refs/heads/master")?;
//! update.set_new_object_id(id);
//! update.update()?;
//! # Ok::<(), gitsql::storage::StorageError>(())
//! ```

mod error;
mod hashing;
mod loader;
mod objects;
mod refs;
mod repository;
mod schema;
mod traits;
mod types;
mod update;

// Re-export public API
pub use error::{StorageError, StorageResult};
pub use hashing::{id_for, object_header, HashingWriter};
pub use loader::{ObjectStream, SqlObjectLoader};
pub use objects::{ObjectReader, ObjectWriter, SqlObjectDatabase};
pub use refs::{Ref, RefState, SqlRefDatabase, MAX_SYMBOLIC_DEPTH};
pub use repository::{RepositoryStats, SqlRepository};
pub use schema::{CREATE_OBJECTS, CREATE_REFS, OBJECTS_TABLE, REFS_TABLE};
pub use traits::{ObjectDatabase, ObjectHandle, ObjectInserter, ObjectLookup, RefDatabase};
pub use types::{AbbreviatedObjectId, InvalidIdError, InvalidNameError, ObjectId, ObjectKind, RefName};
pub use update::{RefUpdate, RefUpdateResult};
