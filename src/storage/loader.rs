//! Lazy object handles.
//!
//! Opening an object only reads its type and length. The payload is fetched
//! on first access and cached; objects above the stream threshold can
//! instead be read in chunks without ever holding the whole payload.

use std::fmt;
use std::io::{self, Cursor, Read};

use rusqlite::{params, OptionalExtension};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::repository::SqlRepository;
use crate::storage::schema::OBJECTS_TABLE;
use crate::storage::traits::ObjectHandle;
use crate::storage::types::{ObjectId, ObjectKind};

/// What a loader has fetched so far.
#[derive(Debug)]
enum LoadState {
    Unloaded,
    MetadataLoaded { kind: ObjectKind, size: u64 },
    FullyLoaded { kind: ObjectKind, data: Vec<u8> },
}

/// An object payload opened for reading.
pub enum ObjectStream<'a> {
    /// the whole payload is in memory
    Buffered {
        kind: ObjectKind,
        size: u64,
        data: Cursor<Vec<u8>>,
    },
    /// the payload is pulled from storage as it is read
    Streamed {
        kind: ObjectKind,
        size: u64,
        reader: Box<dyn Read + 'a>,
    },
}

impl ObjectStream<'_> {
    pub fn kind(&self) -> ObjectKind {
        match self {
            ObjectStream::Buffered { kind, .. } | ObjectStream::Streamed { kind, .. } => *kind,
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            ObjectStream::Buffered { size, .. } | ObjectStream::Streamed { size, .. } => *size,
        }
    }

    pub fn is_streamed(&self) -> bool {
        matches!(self, ObjectStream::Streamed { .. })
    }
}

impl Read for ObjectStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ObjectStream::Buffered { data, .. } => data.read(buf),
            ObjectStream::Streamed { reader, .. } => reader.read(buf),
        }
    }
}

impl fmt::Debug for ObjectStream<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStream")
            .field("kind", &self.kind())
            .field("size", &self.size())
            .field("streamed", &self.is_streamed())
            .finish()
    }
}

/// Lazy handle on one row of the `objects` table.
#[derive(Debug)]
pub struct SqlObjectLoader<'r> {
    repo: &'r SqlRepository,
    id: ObjectId,
    type_hint: Option<ObjectKind>,
    state: LoadState,
}

impl<'r> SqlObjectLoader<'r> {
    pub(crate) fn new(repo: &'r SqlRepository, id: ObjectId, type_hint: Option<ObjectKind>) -> Self {
        Self {
            repo,
            id,
            type_hint,
            state: LoadState::Unloaded,
        }
    }

    pub fn is_metadata_loaded(&self) -> bool {
        !matches!(self.state, LoadState::Unloaded)
    }

    pub fn is_fully_loaded(&self) -> bool {
        matches!(self.state, LoadState::FullyLoaded { .. })
    }

    fn missing(&self) -> StorageError {
        StorageError::MissingObject {
            id: self.id,
            type_hint: self.type_hint,
        }
    }

    /// Fetch type and length, unless already known.
    pub(crate) fn load_metadata(&mut self) -> StorageResult<(ObjectKind, u64)> {
        match &self.state {
            LoadState::MetadataLoaded { kind, size } => return Ok((*kind, *size)),
            LoadState::FullyLoaded { kind, data } => return Ok((*kind, data.len() as u64)),
            LoadState::Unloaded => {}
        }

        let hash = self.id.to_hex();
        let row: Option<(i64, i64)> = self.repo.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT type, LENGTH(content) FROM objects WHERE hash = ?1",
                    params![hash],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?)
        })?;

        let (code, size) = row.ok_or_else(|| self.missing())?;
        let kind = decode_kind(&self.id, code)?;
        let size = size as u64;
        self.state = LoadState::MetadataLoaded { kind, size };
        Ok((kind, size))
    }

    /// Fetch the payload, unless already cached.
    fn load_full(&mut self) -> StorageResult<()> {
        if self.is_fully_loaded() {
            return Ok(());
        }

        let hash = self.id.to_hex();
        let row: Option<(i64, Vec<u8>)> = self.repo.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT type, content FROM objects WHERE hash = ?1",
                    params![hash],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?)
        })?;

        let (code, data) = row.ok_or_else(|| self.missing())?;
        let kind = decode_kind(&self.id, code)?;
        self.state = LoadState::FullyLoaded { kind, data };
        Ok(())
    }
}

impl ObjectHandle for SqlObjectLoader<'_> {
    fn id(&self) -> ObjectId {
        self.id
    }

    fn kind(&mut self) -> StorageResult<ObjectKind> {
        Ok(self.load_metadata()?.0)
    }

    fn size(&mut self) -> StorageResult<u64> {
        Ok(self.load_metadata()?.1)
    }

    fn bytes(&mut self) -> StorageResult<&[u8]> {
        self.load_full()?;
        let missing = self.missing();
        self.cached_bytes().ok_or(missing)
    }

    fn cached_bytes(&self) -> Option<&[u8]> {
        match &self.state {
            LoadState::FullyLoaded { data, .. } => Some(data),
            _ => None,
        }
    }

    fn open_stream(&mut self) -> StorageResult<ObjectStream<'_>> {
        let (kind, size) = self.load_metadata()?;

        if self.is_fully_loaded() || size < self.repo.config().stream_threshold {
            let data = self.bytes()?.to_vec();
            return Ok(ObjectStream::Buffered {
                kind,
                size,
                data: Cursor::new(data),
            });
        }

        let reader = ChunkedObjectReader::new(self.repo, self.id, size, self.repo.config().stream_chunk_size);
        Ok(ObjectStream::Streamed {
            kind,
            size,
            reader: Box::new(reader),
        })
    }
}

fn decode_kind(id: &ObjectId, code: i64) -> StorageResult<ObjectKind> {
    ObjectKind::from_code(code).ok_or_else(|| StorageError::UnknownObjectType {
        id: id.to_hex(),
        code,
    })
}

/// Reads a stored payload in fixed-size slices with `substr`.
struct ChunkedObjectReader<'r> {
    repo: &'r SqlRepository,
    id: ObjectId,
    size: u64,
    offset: u64,
    chunk_size: usize,
    chunk: Cursor<Vec<u8>>,
}

impl<'r> ChunkedObjectReader<'r> {
    fn new(repo: &'r SqlRepository, id: ObjectId, size: u64, chunk_size: usize) -> Self {
        Self {
            repo,
            id,
            size,
            offset: 0,
            chunk_size,
            chunk: Cursor::new(Vec::new()),
        }
    }

    fn fetch_next(&mut self) -> StorageResult<Vec<u8>> {
        let hash = self.id.to_hex();
        // substr is 1-based
        let start = self.offset as i64 + 1;
        let len = self.chunk_size as i64;
        let chunk: Option<Vec<u8>> = self.repo.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT substr(content, ?2, ?3) FROM objects WHERE hash = ?1",
                    params![hash, start, len],
                    |row| row.get(0),
                )
                .optional()?)
        })?;

        chunk.ok_or_else(|| StorageError::MissingObject {
            id: self.id,
            type_hint: None,
        })
    }
}

impl Read for ChunkedObjectReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.chunk.read(buf)?;
        if n > 0 || buf.is_empty() || self.offset >= self.size {
            return Ok(n);
        }

        let next = self.fetch_next().map_err(io::Error::other)?;
        if next.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "{} object {} ended at {} of {} bytes",
                    OBJECTS_TABLE, self.id, self.offset, self.size
                ),
            ));
        }
        self.offset += next.len() as u64;
        self.chunk = Cursor::new(next);
        self.chunk.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::RepositoryConfig;
    use crate::storage::traits::{ObjectInserter, ObjectLookup};

    fn setup(threshold: u64, chunk: usize) -> SqlRepository {
        let config = RepositoryConfig::in_memory()
            .stream_threshold(threshold)
            .stream_chunk_size(chunk);
        SqlRepository::open(config).unwrap()
    }

    fn store(repo: &SqlRepository, kind: ObjectKind, data: &[u8]) -> ObjectId {
        let mut writer = repo.new_object_writer();
        let id = writer.insert_bytes(kind, data).unwrap();
        writer.flush().unwrap();
        id
    }

    #[test]
    fn test_states_advance_lazily() {
        let repo = setup(1024, 16);
        let id = store(&repo, ObjectKind::Blob, b"lazy payload");

        let mut loader = SqlObjectLoader::new(&repo, id, None);
        assert!(!loader.is_metadata_loaded());
        assert!(loader.cached_bytes().is_none());

        assert_eq!(loader.size().unwrap(), 12);
        assert!(loader.is_metadata_loaded());
        assert!(!loader.is_fully_loaded());

        assert_eq!(loader.bytes().unwrap(), b"lazy payload");
        assert!(loader.is_fully_loaded());
        assert_eq!(loader.cached_bytes(), Some(&b"lazy payload"[..]));
        assert_eq!(loader.kind().unwrap(), ObjectKind::Blob);
    }

    #[test]
    fn test_cached_payload_survives_row_deletion() {
        let repo = setup(1024, 16);
        let id = store(&repo, ObjectKind::Blob, b"cached");
        let mut loader = repo.new_object_reader().open(&id, Some(ObjectKind::Blob)).unwrap();
        loader.bytes().unwrap();

        repo.with_conn(|conn| {
            conn.execute("DELETE FROM objects", [])?;
            Ok(())
        })
        .unwrap();

        // served from cache without another query
        assert_eq!(loader.bytes().unwrap(), b"cached");
        assert_eq!(loader.size().unwrap(), 6);
    }

    #[test]
    fn test_unknown_type_code() {
        let repo = setup(1024, 16);
        let id = crate::storage::hashing::id_for(ObjectKind::Blob, b"odd");
        repo.with_conn(|conn| {
            conn.execute(
                "INSERT INTO objects (hash, type, content) VALUES (?1, 9, x'00')",
                params![id.to_hex()],
            )?;
            Ok(())
        })
        .unwrap();

        let err = repo.new_object_reader().open(&id, None).unwrap_err();
        assert!(matches!(err, StorageError::UnknownObjectType { code: 9, .. }));
    }

    #[test]
    fn test_small_objects_are_buffered() {
        let repo = setup(1024, 16);
        let id = store(&repo, ObjectKind::Blob, b"small");
        let mut loader = repo.new_object_reader().open(&id, None).unwrap();

        let mut stream = loader.open_stream().unwrap();
        assert!(!stream.is_streamed());
        assert_eq!(stream.kind(), ObjectKind::Blob);
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"small");
        drop(stream);
        assert!(loader.is_fully_loaded());
    }

    #[test]
    fn test_large_objects_are_streamed_in_chunks() {
        let repo = setup(100, 7);
        let data: Vec<u8> = (0..1000u32).map(|i| (i * 31 % 256) as u8).collect();
        let id = store(&repo, ObjectKind::Blob, &data);
        let mut loader = repo.new_object_reader().open(&id, None).unwrap();

        let mut stream = loader.open_stream().unwrap();
        assert!(stream.is_streamed());
        assert_eq!(stream.size(), 1000);
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
        drop(stream);

        // streaming does not populate the cache
        assert!(!loader.is_fully_loaded());
    }

    #[test]
    fn test_empty_object_stream() {
        let repo = setup(0, 7);
        let id = store(&repo, ObjectKind::Tree, b"");
        let mut loader = repo.new_object_reader().open(&id, None).unwrap();

        let mut stream = loader.open_stream().unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert!(out.is_empty());
    }
}
