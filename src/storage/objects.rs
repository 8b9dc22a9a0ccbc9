//! Object storage.
//!
//! Objects live in the `objects` table keyed by their content address.
//! Writers hash payloads as they stream in and queue rows; nothing reaches
//! the table until the batch is flushed in a single SQL transaction.
//! Readers are stateless and hand out lazy [`SqlObjectLoader`] handles.

use std::io::{self, Read};

use rusqlite::{params, OptionalExtension};
use tracing::{debug, trace, warn};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::hashing::{self, HashingWriter};
use crate::storage::loader::SqlObjectLoader;
use crate::storage::repository::SqlRepository;
use crate::storage::schema::{self, CREATE_OBJECTS, OBJECTS_TABLE};
use crate::storage::traits::{ObjectDatabase, ObjectInserter, ObjectLookup};
use crate::storage::types::{AbbreviatedObjectId, ObjectId, ObjectKind};

/// duplicate content hashes to the same key, so re-inserts are dropped
const INSERT_OBJECT: &str = "INSERT OR IGNORE INTO objects (hash, type, content) VALUES (?1, ?2, ?3)";

/// upper bound on the buffer reserved up front for one payload
const MAX_PREALLOCATION: u64 = 16 * 1024 * 1024;

/// The `objects` table.
///
/// Borrows the repository's connection; cheap to copy.
#[derive(Clone, Copy)]
pub struct SqlObjectDatabase<'r> {
    repo: &'r SqlRepository,
}

impl<'r> SqlObjectDatabase<'r> {
    pub(crate) fn new(repo: &'r SqlRepository) -> Self {
        Self { repo }
    }

    /// number of stored objects
    pub fn count(&self) -> StorageResult<u64> {
        self.repo.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM objects", [], |row| row.get(0))?;
            Ok(count as u64)
        })
    }
}

impl<'r> ObjectDatabase for SqlObjectDatabase<'r> {
    type Reader<'a> = ObjectReader<'r> where Self: 'a;
    type Writer<'a> = ObjectWriter<'r> where Self: 'a;

    fn create(&self) -> StorageResult<()> {
        self.repo
            .with_conn_mut(|conn| schema::recreate_table(conn, OBJECTS_TABLE, CREATE_OBJECTS))?;
        debug!(table = OBJECTS_TABLE, "created object table");
        Ok(())
    }

    fn exists(&self) -> StorageResult<bool> {
        self.repo.with_conn(|conn| schema::table_exists(conn, OBJECTS_TABLE))
    }

    fn new_reader(&self) -> ObjectReader<'r> {
        ObjectReader { repo: self.repo }
    }

    fn new_writer(&self) -> ObjectWriter<'r> {
        ObjectWriter {
            repo: self.repo,
            pending: Vec::new(),
        }
    }
}

/// Stateless read access to the object table.
#[derive(Clone, Copy)]
pub struct ObjectReader<'r> {
    repo: &'r SqlRepository,
}

impl<'r> ObjectLookup for ObjectReader<'r> {
    type Handle = SqlObjectLoader<'r>;

    fn open(&self, id: &ObjectId, type_hint: Option<ObjectKind>) -> StorageResult<SqlObjectLoader<'r>> {
        let mut loader = SqlObjectLoader::new(self.repo, *id, type_hint);
        // surface a missing object here rather than on first access
        loader.load_metadata()?;
        Ok(loader)
    }

    fn has_object(&self, id: &ObjectId) -> StorageResult<bool> {
        let hash = id.to_hex();
        let found: Option<i64> = self.repo.with_conn(|conn| {
            Ok(conn
                .query_row("SELECT 1 FROM objects WHERE hash = ?1", params![hash], |row| row.get(0))
                .optional()?)
        })?;
        Ok(found.is_some())
    }

    fn resolve(&self, prefix: &AbbreviatedObjectId) -> StorageResult<Vec<ObjectId>> {
        // GLOB is case-sensitive and the prefix is plain hex, so no escaping
        let pattern = format!("{}*", prefix);
        let hashes: Vec<String> = self.repo.with_conn(|conn| {
            let mut stmt = conn.prepare_cached("SELECT hash FROM objects WHERE hash GLOB ?1 ORDER BY hash")?;
            let hashes = stmt
                .query_map(params![pattern], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(hashes)
        })?;

        hashes
            .iter()
            .map(|hash| {
                ObjectId::from_hex(hash).map_err(|e| StorageError::CorruptedData {
                    table: OBJECTS_TABLE,
                    reason: format!("malformed hash '{}': {}", hash, e),
                })
            })
            .collect()
    }
}

/// A queued row awaiting flush.
struct PendingObject {
    id: ObjectId,
    kind: ObjectKind,
    content: Vec<u8>,
}

/// Batched insertion into the object table.
///
/// Calls are processed in order; a flush writes the whole batch in one
/// transaction. If the flush fails the batch is kept for a retry.
pub struct ObjectWriter<'r> {
    repo: &'r SqlRepository,
    pending: Vec<PendingObject>,
}

impl ObjectWriter<'_> {
    /// number of objects queued but not yet flushed
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// compute the id `data` would be stored under, without storing it
    pub fn id_for(&self, kind: ObjectKind, data: &[u8]) -> ObjectId {
        hashing::id_for(kind, data)
    }

    /// flush and release the writer
    pub fn close(mut self) -> StorageResult<()> {
        self.flush()
    }
}

impl ObjectInserter for ObjectWriter<'_> {
    fn insert(&mut self, kind: ObjectKind, length: u64, source: &mut dyn Read) -> StorageResult<ObjectId> {
        let mut writer = HashingWriter::new(Vec::with_capacity(length.min(MAX_PREALLOCATION) as usize));
        writer.write_header(kind, length);

        let mut limited = Read::take(source, length);
        let copied = io::copy(&mut limited, &mut writer)?;
        if copied != length {
            return Err(StorageError::ShortRead {
                expected: length,
                actual: copied,
            });
        }

        let (content, id) = writer.finish();
        trace!(%id, %kind, length, "queued object");
        self.pending.push(PendingObject { id, kind, content });
        Ok(id)
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let pending = &self.pending;
        let inserted = self.repo.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let mut inserted = 0;
            {
                let mut stmt = tx.prepare_cached(INSERT_OBJECT)?;
                for object in pending {
                    inserted += stmt.execute(params![object.id.to_hex(), object.kind.code(), object.content])?;
                }
            }
            tx.commit()?;
            Ok(inserted)
        })?;

        debug!(queued = self.pending.len(), inserted, "flushed object batch");
        self.pending.clear();
        Ok(())
    }
}

impl Drop for ObjectWriter<'_> {
    fn drop(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        warn!(pending = self.pending.len(), "object writer dropped with unflushed objects");
        if let Err(e) = self.flush() {
            warn!(error = %e, "final flush of object writer failed");
        }
    }
}
