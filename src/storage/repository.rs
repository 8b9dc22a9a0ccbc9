//! The repository handle.
//!
//! Owns the one live SQL connection. Object and ref stores, readers,
//! writers and loaders all borrow the handle and run their statements
//! through [`SqlRepository::with_conn`], so the handle must outlive them.

use std::fmt;

use parking_lot::Mutex;
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info};

use crate::db::{open_connection, RepositoryConfig};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::objects::{ObjectReader, ObjectWriter, SqlObjectDatabase};
use crate::storage::refs::{Ref, SqlRefDatabase};
use crate::storage::traits::{ObjectDatabase, RefDatabase};
use crate::storage::types::RefName;
use crate::storage::update::{RefUpdate, RefUpdateResult};

/// A Git repository stored in two SQL tables.
pub struct SqlRepository {
    conn: Mutex<Connection>,
    config: RepositoryConfig,
}

impl SqlRepository {
    /// Open the repository described by `config`.
    ///
    /// With `create_if_missing` set, whichever table is absent is created.
    /// Existing tables are never recreated here.
    pub fn open(config: RepositoryConfig) -> StorageResult<Self> {
        let conn = open_connection(&config)?;
        let repo = Self::from_connection(conn, config);

        if !repo.is_initialized()? {
            if !repo.config.create_if_missing {
                return Err(StorageError::Unsupported(format!(
                    "database {} has no repository schema",
                    repo.config.path.display()
                )));
            }
            repo.bootstrap()?;
        }

        Ok(repo)
    }

    /// Wrap an already open connection. No schema checks are made.
    pub fn from_connection(conn: Connection, config: RepositoryConfig) -> Self {
        Self {
            conn: Mutex::new(conn),
            config,
        }
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// True if both tables are present.
    pub fn is_initialized(&self) -> StorageResult<bool> {
        Ok(self.object_database().exists()? && self.ref_database().exists()?)
    }

    /// (Re)create both tables and point `HEAD` at the default branch.
    ///
    /// Any existing content is discarded.
    pub fn create(&self, bare: bool) -> StorageResult<()> {
        Self::require_bare(bare)?;

        self.object_database().create()?;
        self.ref_database().create()?;
        self.link_head()
    }

    /// Create only the tables that are missing, keeping stored content.
    fn bootstrap(&self) -> StorageResult<()> {
        Self::require_bare(self.config.bare)?;

        let objects = self.object_database();
        if !objects.exists()? {
            objects.create()?;
        }

        let refs = self.ref_database();
        if !refs.exists()? {
            refs.create()?;
            self.link_head()?;
        }
        Ok(())
    }

    fn require_bare(bare: bool) -> StorageResult<()> {
        if bare {
            Ok(())
        } else {
            Err(StorageError::Unsupported(
                "only bare repositories can be stored in SQL".to_string(),
            ))
        }
    }

    fn link_head(&self) -> StorageResult<()> {
        let branch = RefName::branch(&self.config.default_branch)?;
        let mut head = self.ref_database().new_update(RefName::HEAD, false)?;
        match head.link(branch.as_str())? {
            RefUpdateResult::New => {}
            other => {
                return Err(StorageError::InvalidUpdate {
                    name: RefName::HEAD.to_string(),
                    reason: format!("linking to {} returned {}", branch, other),
                })
            }
        }

        info!(path = %self.config.path.display(), head = %branch, "initialised repository");
        Ok(())
    }

    pub fn object_database(&self) -> SqlObjectDatabase<'_> {
        SqlObjectDatabase::new(self)
    }

    pub fn ref_database(&self) -> SqlRefDatabase<'_> {
        SqlRefDatabase::new(self)
    }

    pub fn new_object_writer(&self) -> ObjectWriter<'_> {
        self.object_database().new_writer()
    }

    pub fn new_object_reader(&self) -> ObjectReader<'_> {
        self.object_database().new_reader()
    }

    /// Start an update of `name`, following symbolic links to the leaf.
    pub fn update_ref(&self, name: &str) -> StorageResult<RefUpdate<SqlRefDatabase<'_>>> {
        self.ref_database().new_update(name, false)
    }

    pub fn get_ref(&self, name: &str) -> StorageResult<Option<Ref>> {
        self.ref_database().get_ref(name)
    }

    pub fn stats(&self) -> StorageResult<RepositoryStats> {
        Ok(RepositoryStats {
            objects: self.object_database().count()?,
            refs: self.ref_database().count()?,
        })
    }

    /// Run `f` with shared access to the connection.
    pub(crate) fn with_conn<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Connection) -> StorageResult<T>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Run `f` with exclusive access, needed to open a transaction.
    pub(crate) fn with_conn_mut<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&mut Connection) -> StorageResult<T>,
    {
        let mut conn = self.conn.lock();
        f(&mut conn)
    }

    /// Close the connection, reporting any error the driver raises.
    pub fn close(self) -> StorageResult<()> {
        debug!(path = %self.config.path.display(), "closing repository");
        self.conn.into_inner().close().map_err(|(_, e)| StorageError::Sql(e))
    }
}

impl fmt::Debug for SqlRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlRepository")
            .field("path", &self.config.path)
            .finish_non_exhaustive()
    }
}

/// Row counts of a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RepositoryStats {
    pub objects: u64,
    pub refs: u64,
}

impl fmt::Display for RepositoryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Repository Statistics:")?;
        writeln!(f, "  Objects: {}", self.objects)?;
        write!(f, "  Refs: {}", self.refs)
    }
}
