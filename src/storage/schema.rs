//! Table definitions for the object store and the ref database.

use rusqlite::{params, Connection, OptionalExtension};

use crate::storage::error::StorageResult;

/// table holding content-addressed objects
pub const OBJECTS_TABLE: &str = "objects";

/// table holding references
pub const REFS_TABLE: &str = "refs";

pub const CREATE_OBJECTS: &str = "CREATE TABLE objects (
    hash    TEXT    NOT NULL PRIMARY KEY,
    type    INTEGER NOT NULL,
    content BLOB    NOT NULL
)";

pub const CREATE_REFS: &str = "CREATE TABLE refs (
    name     TEXT    NOT NULL PRIMARY KEY,
    symbolic INTEGER NOT NULL,
    target   TEXT    NOT NULL
)";

/// Drop `table` if present and recreate it from `ddl`, in one transaction.
///
/// Absence of the table is not an error; any other DDL failure is.
pub(crate) fn recreate_table(conn: &mut Connection, table: &str, ddl: &str) -> StorageResult<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(&format!("DROP TABLE IF EXISTS {table};"))?;
    tx.execute_batch(ddl)?;
    tx.commit()?;
    Ok(())
}

/// Check whether a table exists.
pub(crate) fn table_exists(conn: &Connection, table: &str) -> StorageResult<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}
