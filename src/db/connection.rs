//! Connection provisioning for the SQL backend.

use rusqlite::{Connection, OpenFlags};
use tracing::debug;

use super::config::RepositoryConfig;
use crate::storage::StorageResult;

/// Open a connection for the given configuration.
///
/// File databases are switched to WAL so readers on other connections are
/// not blocked by an in-flight batch insert.
pub fn open_connection(config: &RepositoryConfig) -> StorageResult<Connection> {
    let conn = if config.is_in_memory() {
        Connection::open_in_memory()?
    } else {
        let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        if config.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        let conn = Connection::open_with_flags(&config.path, flags)?;
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn
    };

    conn.busy_timeout(config.busy_timeout)?;

    debug!(path = %config.path.display(), "opened repository connection");
    Ok(conn)
}
