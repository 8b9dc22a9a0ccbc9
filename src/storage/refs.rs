//! Reference storage.
//!
//! Refs live in the `refs` table as `(name, symbolic, target)` rows. A
//! direct ref's target is an object id in hex; a symbolic ref's target is
//! another ref name. Resolution follows symbolic links until it reaches a
//! direct ref (see [`RefDatabase::get_ref`]).
//!
//! Writes are conditioned on the row still holding the state the caller
//! read, so the affected-row count doubles as a compare-and-swap result.

use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use tracing::debug;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::repository::SqlRepository;
use crate::storage::schema::{self, CREATE_REFS, REFS_TABLE};
use crate::storage::traits::RefDatabase;
use crate::storage::types::ObjectId;

/// how many symbolic links resolution will follow
pub const MAX_SYMBOLIC_DEPTH: usize = 5;

/// A resolved reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Ref {
    /// points straight at an object
    Direct { name: String, id: ObjectId },
    /// points at another ref, already resolved
    Symbolic { name: String, target: Box<Ref> },
}

impl Ref {
    pub fn name(&self) -> &str {
        match self {
            Ref::Direct { name, .. } | Ref::Symbolic { name, .. } => name,
        }
    }

    pub fn is_symbolic(&self) -> bool {
        matches!(self, Ref::Symbolic { .. })
    }

    /// the ref this one links to, if symbolic
    pub fn target(&self) -> Option<&Ref> {
        match self {
            Ref::Symbolic { target, .. } => Some(target),
            Ref::Direct { .. } => None,
        }
    }

    /// the direct ref at the end of the chain
    pub fn leaf(&self) -> &Ref {
        let mut current = self;
        while let Ref::Symbolic { target, .. } = current {
            current = target;
        }
        current
    }

    /// the object the chain ultimately points at
    pub fn object_id(&self) -> ObjectId {
        match self.leaf() {
            Ref::Direct { id, .. } => *id,
            Ref::Symbolic { .. } => ObjectId::zero(),
        }
    }
}

/// The stored state of one ref row, without following links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefState {
    Missing,
    Direct(ObjectId),
    Symbolic(String),
}

impl RefState {
    pub fn exists(&self) -> bool {
        !matches!(self, RefState::Missing)
    }

    /// `(symbolic, target)` column values for a conditioned write
    fn columns(&self) -> Option<(bool, String)> {
        match self {
            RefState::Missing => None,
            RefState::Direct(id) => Some((false, id.to_hex())),
            RefState::Symbolic(target) => Some((true, target.clone())),
        }
    }
}

/// The `refs` table.
///
/// Borrows the repository's connection; cheap to copy.
#[derive(Clone, Copy)]
pub struct SqlRefDatabase<'r> {
    repo: &'r SqlRepository,
}

impl<'r> SqlRefDatabase<'r> {
    pub(crate) fn new(repo: &'r SqlRepository) -> Self {
        Self { repo }
    }

    /// number of stored refs
    pub fn count(&self) -> StorageResult<u64> {
        self.repo.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM refs", [], |row| row.get(0))?;
            Ok(count as u64)
        })
    }
}

impl RefDatabase for SqlRefDatabase<'_> {
    fn create(&self) -> StorageResult<()> {
        self.repo
            .with_conn_mut(|conn| schema::recreate_table(conn, REFS_TABLE, CREATE_REFS))?;
        debug!(table = REFS_TABLE, "created ref table");
        Ok(())
    }

    fn exists(&self) -> StorageResult<bool> {
        self.repo.with_conn(|conn| schema::table_exists(conn, REFS_TABLE))
    }

    fn read_state(&self, name: &str) -> StorageResult<RefState> {
        let row: Option<(bool, String)> = self.repo.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT symbolic, target FROM refs WHERE name = ?1",
                    params![name],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?)
        })?;

        match row {
            None => Ok(RefState::Missing),
            Some((true, target)) => Ok(RefState::Symbolic(target)),
            Some((false, target)) => {
                let id = ObjectId::from_hex(&target).map_err(|e| StorageError::CorruptedData {
                    table: REFS_TABLE,
                    reason: format!("ref {} has malformed target '{}': {}", name, target, e),
                })?;
                Ok(RefState::Direct(id))
            }
        }
    }

    fn list_names(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.repo.with_conn(|conn| {
            // substr instead of LIKE: LIKE is case-insensitive and treats '_' as a wildcard
            let mut stmt = conn.prepare_cached(
                "SELECT name FROM refs WHERE substr(name, 1, length(?1)) = ?1 ORDER BY name",
            )?;
            let names = stmt
                .query_map(params![prefix], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(names)
        })
    }

    fn write_direct(&self, name: &str, expected: &RefState, new_id: &ObjectId) -> StorageResult<usize> {
        let new_target = new_id.to_hex();
        let changed = self.repo.with_conn(|conn| {
            let changed = match expected.columns() {
                None => conn.execute(
                    "INSERT INTO refs (name, symbolic, target) VALUES (?1, 0, ?2)
                     ON CONFLICT(name) DO NOTHING",
                    params![name, new_target],
                )?,
                Some((symbolic, old_target)) => conn.execute(
                    "UPDATE refs SET symbolic = 0, target = ?2
                     WHERE name = ?1 AND symbolic = ?3 AND target = ?4",
                    params![name, new_target, symbolic, old_target],
                )?,
            };
            Ok(changed)
        })?;

        debug!(name, target = %new_id, changed, "wrote direct ref");
        Ok(changed)
    }

    fn write_symbolic(&self, name: &str, target: &str) -> StorageResult<usize> {
        let changed = self.repo.with_conn(|conn| {
            Ok(conn.execute(
                "INSERT INTO refs (name, symbolic, target) VALUES (?1, 1, ?2)",
                params![name, target],
            )?)
        })?;

        debug!(name, target, changed, "wrote symbolic ref");
        Ok(changed)
    }

    fn remove(&self, name: &str, expected: &RefState) -> StorageResult<usize> {
        let Some((symbolic, old_target)) = expected.columns() else {
            return Ok(0);
        };

        let changed = self.repo.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM refs WHERE name = ?1 AND symbolic = ?2 AND target = ?3",
                params![name, symbolic, old_target],
            )?)
        })?;

        debug!(name, changed, "deleted ref");
        Ok(changed)
    }
}
