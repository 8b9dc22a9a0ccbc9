//! Capability traits for object and reference storage.
//!
//! The SQL tables are one backend. Anything that can hand out object
//! handles and apply conditioned ref writes can sit behind these traits;
//! symbolic resolution and the ref update state machine are written
//! against them and work unchanged for every backend.

use std::collections::BTreeMap;
use std::io::Read;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::loader::ObjectStream;
use crate::storage::refs::{Ref, RefState, MAX_SYMBOLIC_DEPTH};
use crate::storage::types::{AbbreviatedObjectId, ObjectId, ObjectKind};
use crate::storage::update::RefUpdate;

/// A handle on one stored object whose metadata and payload load lazily.
pub trait ObjectHandle {
    /// the object's id
    fn id(&self) -> ObjectId;

    /// the object's kind, loading metadata on first use
    fn kind(&mut self) -> StorageResult<ObjectKind>;

    /// payload size in bytes, loading metadata on first use
    fn size(&mut self) -> StorageResult<u64>;

    /// the full payload, loading and caching it on first use
    fn bytes(&mut self) -> StorageResult<&[u8]>;

    /// the payload if it has already been loaded
    fn cached_bytes(&self) -> Option<&[u8]>;

    /// open the payload as a stream, buffered or chunked depending on size
    fn open_stream(&mut self) -> StorageResult<ObjectStream<'_>>;
}

/// Read side of an object store.
pub trait ObjectLookup {
    type Handle: ObjectHandle;

    /// Open an object. Fails with [`StorageError::MissingObject`] if absent.
    fn open(&self, id: &ObjectId, type_hint: Option<ObjectKind>) -> StorageResult<Self::Handle>;

    fn has_object(&self, id: &ObjectId) -> StorageResult<bool>;

    /// Every stored id starting with `prefix`.
    fn resolve(&self, prefix: &AbbreviatedObjectId) -> StorageResult<Vec<ObjectId>>;

    /// The single id starting with `prefix`.
    fn resolve_unique(&self, prefix: &AbbreviatedObjectId) -> StorageResult<ObjectId> {
        let mut candidates = self.resolve(prefix)?;
        match candidates.len() {
            0 => Err(StorageError::UnresolvedPrefix(prefix.to_string())),
            1 => Ok(candidates.remove(0)),
            _ => Err(StorageError::AmbiguousPrefix {
                prefix: prefix.to_string(),
                candidates,
            }),
        }
    }
}

/// Write side of an object store.
pub trait ObjectInserter {
    /// Hash and queue `length` bytes read from `source` as one object.
    fn insert(&mut self, kind: ObjectKind, length: u64, source: &mut dyn Read) -> StorageResult<ObjectId>;

    fn insert_bytes(&mut self, kind: ObjectKind, data: &[u8]) -> StorageResult<ObjectId> {
        let mut source = data;
        self.insert(kind, data.len() as u64, &mut source)
    }

    /// Make every queued object durable.
    fn flush(&mut self) -> StorageResult<()>;
}

/// An object store.
pub trait ObjectDatabase {
    type Reader<'a>: ObjectLookup
    where
        Self: 'a;
    type Writer<'a>: ObjectInserter
    where
        Self: 'a;

    /// (Re)create the backing storage.
    fn create(&self) -> StorageResult<()>;

    fn exists(&self) -> StorageResult<bool>;

    fn new_reader(&self) -> Self::Reader<'_>;

    fn new_writer(&self) -> Self::Writer<'_>;
}

/// A reference database.
///
/// Backends supply raw row access and conditioned writes; resolution,
/// listing and update construction come for free.
pub trait RefDatabase {
    /// (Re)create the backing storage.
    fn create(&self) -> StorageResult<()>;

    fn exists(&self) -> StorageResult<bool>;

    /// Stored state of exactly `name`, without following symbolic links.
    fn read_state(&self, name: &str) -> StorageResult<RefState>;

    /// Names of every stored ref starting with `prefix`, sorted.
    fn list_names(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Point `name` at `new_id`, only if it is still in `expected` state.
    ///
    /// Returns the number of rows touched; zero means the condition failed.
    fn write_direct(&self, name: &str, expected: &RefState, new_id: &ObjectId) -> StorageResult<usize>;

    /// Insert `name` as a symbolic link to `target`.
    fn write_symbolic(&self, name: &str, target: &str) -> StorageResult<usize>;

    /// Delete `name`, only if it is still in `expected` state.
    fn remove(&self, name: &str, expected: &RefState) -> StorageResult<usize>;

    /// Best-effort lock. No backend-level locking exists, so this succeeds.
    fn try_lock(&self, _name: &str) -> StorageResult<bool> {
        Ok(true)
    }

    fn unlock(&self, _name: &str) {}

    /// True if a ref with exactly this name exists.
    ///
    /// Does not check the directory/file rule (`a` vs `a/b`).
    fn is_name_conflicting(&self, name: &str) -> StorageResult<bool> {
        Ok(!matches!(self.read_state(name)?, RefState::Missing))
    }

    /// Look up a ref, following symbolic links to a direct ref.
    ///
    /// Returns `Ok(None)` if `name` itself does not exist.
    fn get_ref(&self, name: &str) -> StorageResult<Option<Ref>> {
        let mut chain = Vec::new();
        resolve_ref(self, name, &mut chain)
    }

    /// Every ref whose name starts with `prefix`, resolved.
    ///
    /// Returns `Ok(None)` when nothing matches.
    fn get_refs(&self, prefix: &str) -> StorageResult<Option<BTreeMap<String, Ref>>> {
        let names = self.list_names(prefix)?;
        if names.is_empty() {
            return Ok(None);
        }

        let mut refs = BTreeMap::new();
        for name in names {
            // a row deleted between the listing and the lookup is skipped
            if let Some(resolved) = self.get_ref(&name)? {
                refs.insert(name, resolved);
            }
        }
        Ok(Some(refs))
    }

    /// Start an update of `name`, seeded with its current state.
    fn new_update(&self, name: &str, detach: bool) -> StorageResult<RefUpdate<Self>>
    where
        Self: Clone + Sized,
    {
        RefUpdate::new(self.clone(), name, detach)
    }
}

fn resolve_ref<D: RefDatabase + ?Sized>(
    db: &D,
    name: &str,
    chain: &mut Vec<String>,
) -> StorageResult<Option<Ref>> {
    if chain.iter().any(|seen| seen == name) {
        chain.push(name.to_string());
        return Err(StorageError::CyclicReference { chain: chain.clone() });
    }
    if chain.len() > MAX_SYMBOLIC_DEPTH {
        return Err(StorageError::SymbolicDepthExceeded {
            name: chain[0].clone(),
            max_depth: MAX_SYMBOLIC_DEPTH,
        });
    }
    chain.push(name.to_string());

    match db.read_state(name)? {
        RefState::Missing => Ok(None),
        RefState::Direct(id) => Ok(Some(Ref::Direct {
            name: name.to_string(),
            id,
        })),
        RefState::Symbolic(target) => match resolve_ref(db, &target, chain)? {
            Some(resolved) => Ok(Some(Ref::Symbolic {
                name: name.to_string(),
                target: Box::new(resolved),
            })),
            None => Err(StorageError::BrokenSymbolicRef {
                name: name.to_string(),
                target,
            }),
        },
    }
}
