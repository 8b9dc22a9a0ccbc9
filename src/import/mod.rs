//! Bulk import of an on-disk Git repository.
//!
//! Every object reachable from a ref of the source repository (commits,
//! their trees all the way down, blobs and annotated tags) is copied into
//! the object table, then every ref except `HEAD` is recreated. Objects are
//! written in batches; refs are written once all objects are durable.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use git2::{ErrorCode, ObjectType, Oid, ReferenceType, Repository, TreeWalkMode, TreeWalkResult};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::storage::{
    ObjectId, ObjectInserter, ObjectKind, RefName, RefUpdateResult, RepositoryStats, SqlRepository,
    StorageError,
};

/// default number of objects written per transaction
pub const DEFAULT_FLUSH_EVERY: usize = 100;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("report serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

pub type ImportResult<T> = Result<T, ImportError>;

/// Import options.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Source repository (working tree or bare).
    pub source: PathBuf,
    /// Flush the object batch after this many objects. Zero flushes once at the end.
    pub flush_every: usize,
    /// Recreate both tables before importing.
    pub recreate: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            source: PathBuf::from("."),
            flush_every: DEFAULT_FLUSH_EVERY,
            recreate: true,
        }
    }
}

impl ImportOptions {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            ..Default::default()
        }
    }

    pub fn flush_every(mut self, objects: usize) -> Self {
        self.flush_every = objects;
        self
    }

    pub fn recreate(mut self, value: bool) -> Self {
        self.recreate = value;
        self
    }
}

/// An object whose stored id differs from its id in the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HashMismatch {
    pub expected: ObjectId,
    pub actual: ObjectId,
}

/// An object that could not be copied.
#[derive(Debug, Clone, Serialize)]
pub struct ObjectFailure {
    pub id: ObjectId,
    pub reason: String,
}

/// A ref that could not be recreated.
#[derive(Debug, Clone, Serialize)]
pub struct RefFailure {
    pub name: String,
    pub reason: String,
}

/// Outcome of an import run.
#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    pub source: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub objects_found: usize,
    pub objects_imported: usize,
    pub mismatches: Vec<HashMismatch>,
    pub object_failures: Vec<ObjectFailure>,
    pub refs_imported: usize,
    pub ref_failures: Vec<RefFailure>,
    pub stats: RepositoryStats,
}

impl ImportReport {
    fn new(source: &Path) -> Self {
        let now = Utc::now();
        Self {
            source: source.to_path_buf(),
            started_at: now,
            finished_at: now,
            objects_found: 0,
            objects_imported: 0,
            mismatches: Vec::new(),
            object_failures: Vec::new(),
            refs_imported: 0,
            ref_failures: Vec::new(),
            stats: RepositoryStats { objects: 0, refs: 0 },
        }
    }

    /// true if every object and ref made it across unchanged
    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty() && self.object_failures.is_empty() && self.ref_failures.is_empty()
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    pub fn to_json(&self) -> ImportResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl fmt::Display for ImportReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Imported {}", self.source.display())?;
        writeln!(f, "  Objects: {} of {}", self.objects_imported, self.objects_found)?;
        writeln!(f, "  Refs: {}", self.refs_imported)?;
        writeln!(f, "  Hash mismatches: {}", self.mismatches.len())?;
        writeln!(f, "  Failures: {}", self.object_failures.len() + self.ref_failures.len())?;
        write!(f, "  Took: {} ms", self.duration().num_milliseconds())
    }
}

/// Copies a Git repository into a [`SqlRepository`].
pub struct Importer<'r> {
    repo: &'r SqlRepository,
    options: ImportOptions,
}

impl<'r> Importer<'r> {
    pub fn new(repo: &'r SqlRepository, options: ImportOptions) -> Self {
        Self { repo, options }
    }

    /// Run the import.
    ///
    /// Per-object and per-ref failures are recorded in the report and the
    /// run continues; git errors while walking the source and lost
    /// connections abort it.
    pub fn run(&self) -> ImportResult<ImportReport> {
        let source = Repository::open(&self.options.source)?;
        let mut report = ImportReport::new(&self.options.source);

        if self.options.recreate {
            self.repo.create(true)?;
        }

        self.import_objects(&source, &mut report)?;
        self.import_refs(&source, &mut report)?;

        report.stats = self.repo.stats()?;
        report.finished_at = Utc::now();
        info!(
            objects = report.objects_imported,
            refs = report.refs_imported,
            failures = report.object_failures.len() + report.ref_failures.len(),
            "import finished"
        );
        Ok(report)
    }

    fn import_objects(&self, source: &Repository, report: &mut ImportReport) -> ImportResult<()> {
        let objects = collect_objects(source)?;
        let total = objects.len();
        report.objects_found = total;
        info!(total, "objects to import");

        let odb = source.odb()?;
        let mut writer = self.repo.new_object_writer();

        for (counter, oid) in objects.into_iter().enumerate() {
            let expected = ObjectId::from(oid);
            match self.copy_object(&odb, &mut writer, oid) {
                Ok(actual) => {
                    report.objects_imported += 1;
                    if actual != expected {
                        warn!(%expected, %actual, "object hash differs after import");
                        report.mismatches.push(HashMismatch { expected, actual });
                    }
                }
                Err(ImportError::Storage(e)) if e.is_connection_failure() => return Err(e.into()),
                Err(e) => {
                    warn!(id = %expected, error = %e, "failed to import object");
                    report.object_failures.push(ObjectFailure {
                        id: expected,
                        reason: e.to_string(),
                    });
                }
            }

            let done = counter + 1;
            if self.options.flush_every > 0 && done % self.options.flush_every == 0 {
                writer.flush()?;
                info!(done, total, "flushed objects");
            }
        }

        writer.close()?;
        info!(done = total, total, "flushed objects");
        Ok(())
    }

    fn copy_object<W: ObjectInserter>(&self, odb: &git2::Odb<'_>, writer: &mut W, oid: Oid) -> ImportResult<ObjectId> {
        let object = odb.read(oid)?;
        let kind = ObjectKind::from_git2(object.kind()).ok_or_else(|| {
            StorageError::Unsupported(format!("object {} has unsupported type {:?}", oid, object.kind()))
        })?;
        debug!(id = %oid, %kind, size = object.len(), "importing object");
        Ok(writer.insert_bytes(kind, object.data())?)
    }

    fn import_refs(&self, source: &Repository, report: &mut ImportReport) -> ImportResult<()> {
        let mut refs = Vec::new();
        for reference in source.references()? {
            let reference = reference?;
            let Some(name) = reference.name() else {
                warn!("skipping ref with a non UTF-8 name");
                continue;
            };
            if name == RefName::HEAD {
                continue;
            }
            let target = match reference.kind() {
                Some(ReferenceType::Symbolic) => reference.symbolic_target().map(|t| SourceRef::Symbolic(t.to_string())),
                Some(ReferenceType::Direct) => reference.target().map(|oid| SourceRef::Direct(oid.into())),
                None => None,
            };
            match target {
                Some(target) => refs.push((name.to_string(), target)),
                None => report.ref_failures.push(RefFailure {
                    name: name.to_string(),
                    reason: "unreadable target".to_string(),
                }),
            }
        }
        refs.sort_by(|a, b| a.0.cmp(&b.0));

        for (name, target) in refs {
            debug!(%name, "importing ref");
            match self.copy_ref(&name, &target) {
                Ok(RefUpdateResult::New) => report.refs_imported += 1,
                Ok(result) => {
                    warn!(%name, %result, "failed to import ref");
                    report.ref_failures.push(RefFailure {
                        name,
                        reason: format!("update returned {}", result),
                    });
                }
                Err(e) if e.is_connection_failure() => return Err(e.into()),
                Err(e) => {
                    warn!(%name, error = %e, "failed to import ref");
                    report.ref_failures.push(RefFailure {
                        name,
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn copy_ref(&self, name: &str, target: &SourceRef) -> Result<RefUpdateResult, StorageError> {
        let mut update = self.repo.update_ref(name)?;
        match target {
            SourceRef::Symbolic(target) => update.link(target),
            SourceRef::Direct(id) => {
                update.set_new_object_id(*id);
                update.set_force_update(true);
                update.update()
            }
        }
    }
}

enum SourceRef {
    Direct(ObjectId),
    Symbolic(String),
}

/// Every object reachable from a ref of `source` or from its `HEAD`, in id order.
///
/// A detached `HEAD` counts as a tip. Gitlink entries (submodule commits)
/// are skipped; they live in another repository.
pub fn collect_objects(source: &Repository) -> Result<BTreeSet<Oid>, git2::Error> {
    let mut tips = Vec::new();
    for reference in source.references()? {
        // symbolic refs name another ref that is visited on its own
        if let Some(oid) = reference?.target() {
            tips.push(oid);
        }
    }
    match source.head() {
        Ok(head) => tips.extend(head.target()),
        Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => {}
        Err(e) => return Err(e),
    }

    let mut objects = BTreeSet::new();
    let mut walk = source.revwalk()?;
    let mut has_commits = false;

    for mut oid in tips {
        loop {
            let object = source.find_object(oid, None)?;
            match object.kind() {
                Some(ObjectType::Tag) => {
                    objects.insert(oid);
                    let Some(tag) = object.as_tag() else { break };
                    oid = tag.target_id();
                }
                Some(ObjectType::Commit) => {
                    walk.push(oid)?;
                    has_commits = true;
                    break;
                }
                Some(ObjectType::Tree) => {
                    objects.insert(oid);
                    collect_tree(source, oid, &mut objects)?;
                    break;
                }
                _ => {
                    objects.insert(oid);
                    break;
                }
            }
        }
    }

    if has_commits {
        for commit_id in walk {
            let commit_id = commit_id?;
            let commit = source.find_commit(commit_id)?;
            objects.insert(commit_id);
            if objects.insert(commit.tree_id()) {
                collect_tree(source, commit.tree_id(), &mut objects)?;
            }
        }
    }

    Ok(objects)
}

fn collect_tree(source: &Repository, tree_id: Oid, objects: &mut BTreeSet<Oid>) -> Result<(), git2::Error> {
    let tree = source.find_tree(tree_id)?;
    tree.walk(TreeWalkMode::PreOrder, |_, entry| {
        if entry.kind() != Some(ObjectType::Commit) {
            objects.insert(entry.id());
        }
        TreeWalkResult::Ok
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    use crate::db::RepositoryConfig;
    use crate::storage::{ObjectHandle, ObjectLookup, RefDatabase, RefState};

    struct Fixture {
        _dir: TempDir,
        path: PathBuf,
        master: Oid,
        first: Oid,
        tag: Oid,
        nested_blob: Oid,
    }

    /// two commits on master, a nested directory, a branch, both tag kinds
    /// and a symbolic remote HEAD
    fn source_repo() -> Fixture {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let sig = git2::Signature::now("Test", "test@example.com").unwrap();

        let alpha = repo.blob(b"alpha\n").unwrap();
        let nested_blob = repo.blob(b"nested\n").unwrap();

        let mut sub = repo.treebuilder(None).unwrap();
        sub.insert("inner.txt", nested_blob, 0o100644).unwrap();
        let sub_id = sub.write().unwrap();

        let mut root = repo.treebuilder(None).unwrap();
        root.insert("a.txt", alpha, 0o100644).unwrap();
        root.insert("dir", sub_id, 0o040000).unwrap();
        let tree = repo.find_tree(root.write().unwrap()).unwrap();
        let first = repo
            .commit(Some("refs/heads/master"), &sig, &sig, "first", &tree, &[])
            .unwrap();

        let beta = repo.blob(b"beta\n").unwrap();
        let mut root = repo.treebuilder(Some(&tree)).unwrap();
        root.insert("b.txt", beta, 0o100644).unwrap();
        let tree = repo.find_tree(root.write().unwrap()).unwrap();
        let parent = repo.find_commit(first).unwrap();
        let master = repo
            .commit(Some("refs/heads/master"), &sig, &sig, "second", &tree, &[&parent])
            .unwrap();

        repo.branch("feature", &parent, false).unwrap();
        let tag = repo
            .tag("v1.0", parent.as_object(), &sig, "release", false)
            .unwrap();
        repo.reference("refs/tags/light", master, false, "lightweight")
            .unwrap();
        repo.reference_symbolic("refs/remotes/origin/HEAD", "refs/heads/master", false, "remote head")
            .unwrap();

        let path = dir.path().to_path_buf();
        Fixture {
            _dir: dir,
            path,
            master,
            first,
            tag,
            nested_blob,
        }
    }

    fn target() -> SqlRepository {
        SqlRepository::open(RepositoryConfig::in_memory()).unwrap()
    }

    #[test]
    fn test_collect_objects() {
        let fixture = source_repo();
        let source = Repository::open(&fixture.path).unwrap();
        let objects = collect_objects(&source).unwrap();

        // 3 blobs, 3 trees, 2 commits, 1 tag
        assert_eq!(objects.len(), 9);
        assert!(objects.contains(&fixture.nested_blob));
        assert!(objects.contains(&fixture.tag));
        assert!(objects.contains(&fixture.first));
    }

    #[test]
    fn test_import_copies_everything() {
        let fixture = source_repo();
        let repo = target();

        let report = Importer::new(&repo, ImportOptions::new(&fixture.path)).run().unwrap();
        assert!(report.is_clean(), "{:?}", report);
        assert_eq!(report.objects_found, 9);
        assert_eq!(report.objects_imported, 9);
        assert_eq!(report.stats.objects, 9);

        // every source object is present with identical kind and payload
        let source = Repository::open(&fixture.path).unwrap();
        let odb = source.odb().unwrap();
        let mut oids = Vec::new();
        odb.foreach(|oid| {
            oids.push(*oid);
            true
        })
        .unwrap();
        assert_eq!(oids.len(), 9);

        let reader = repo.new_object_reader();
        for oid in oids {
            let expected = odb.read(oid).unwrap();
            let mut loader = reader.open(&ObjectId::from(oid), None).unwrap();
            assert_eq!(loader.kind().unwrap().to_git2(), expected.kind());
            assert_eq!(loader.bytes().unwrap(), expected.data());
        }
    }

    #[test]
    fn test_import_refs() {
        let fixture = source_repo();
        let repo = target();
        let report = Importer::new(&repo, ImportOptions::new(&fixture.path)).run().unwrap();

        // master, feature, v1.0, light, origin/HEAD
        assert_eq!(report.refs_imported, 5);
        // the above plus the bootstrap HEAD
        assert_eq!(report.stats.refs, 6);

        let master = repo.get_ref("refs/heads/master").unwrap().unwrap();
        assert_eq!(master.object_id(), ObjectId::from(fixture.master));

        let feature = repo.get_ref("refs/heads/feature").unwrap().unwrap();
        assert_eq!(feature.object_id(), ObjectId::from(fixture.first));

        // annotated tags keep pointing at the tag object
        let tag = repo.get_ref("refs/tags/v1.0").unwrap().unwrap();
        assert_eq!(tag.object_id(), ObjectId::from(fixture.tag));
        let mut loader = repo.new_object_reader().open(&tag.object_id(), None).unwrap();
        assert_eq!(loader.kind().unwrap(), ObjectKind::Tag);

        let remote = repo.get_ref("refs/remotes/origin/HEAD").unwrap().unwrap();
        assert!(remote.is_symbolic());
        assert_eq!(remote.object_id(), ObjectId::from(fixture.master));

        // bootstrap HEAD now resolves through the imported master
        assert_eq!(repo.get_ref("HEAD").unwrap().unwrap().object_id(), ObjectId::from(fixture.master));
    }

    #[test]
    fn test_flush_every_object() {
        let fixture = source_repo();
        let repo = target();
        let options = ImportOptions::new(&fixture.path).flush_every(1);
        let report = Importer::new(&repo, options).run().unwrap();
        assert!(report.is_clean());
        assert_eq!(repo.stats().unwrap().objects, 9);
    }

    #[test]
    fn test_reimport_without_recreate() {
        let fixture = source_repo();
        let repo = target();
        Importer::new(&repo, ImportOptions::new(&fixture.path)).run().unwrap();

        let options = ImportOptions::new(&fixture.path).recreate(false);
        let report = Importer::new(&repo, options).run().unwrap();

        // objects are ignored as duplicates, refs already exist
        assert!(report.object_failures.is_empty());
        assert_eq!(report.objects_imported, 9);
        assert_eq!(report.stats.objects, 9);
        assert_eq!(report.refs_imported, 0);
        assert_eq!(report.ref_failures.len(), 5);
        assert!(!report.is_clean());

        assert_eq!(
            repo.ref_database().read_state("refs/heads/master").unwrap(),
            RefState::Direct(ObjectId::from(fixture.master))
        );
    }

    #[test]
    fn test_recreate_discards_previous_content() {
        let fixture = source_repo();
        let repo = target();
        let mut writer = repo.new_object_writer();
        writer.insert_bytes(ObjectKind::Blob, b"stale").unwrap();
        writer.close().unwrap();

        let report = Importer::new(&repo, ImportOptions::new(&fixture.path)).run().unwrap();
        assert_eq!(report.stats.objects, 9);
    }

    #[test]
    fn test_missing_source() {
        let dir = TempDir::new().unwrap();
        let repo = target();
        let err = Importer::new(&repo, ImportOptions::new(dir.path().join("nope")))
            .run()
            .unwrap_err();
        assert!(matches!(err, ImportError::Git(_)));
    }

    #[test]
    fn test_report_json() {
        let fixture = source_repo();
        let repo = target();
        let report = Importer::new(&repo, ImportOptions::new(&fixture.path)).run().unwrap();

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["objects_imported"], 9);
        assert_eq!(json["stats"]["objects"], 9);
        assert!(json["started_at"].is_string());
        assert!(json["mismatches"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_collect_detached_head() {
        let fixture = source_repo();
        let source = Repository::open(&fixture.path).unwrap();
        let sig = git2::Signature::now("Test", "test@example.com").unwrap();
        let parent = source.find_commit(fixture.master).unwrap();
        let tree = parent.tree().unwrap();

        // reachable from HEAD only
        let detached = source.commit(None, &sig, &sig, "detached", &tree, &[&parent]).unwrap();
        source.set_head_detached(detached).unwrap();

        let objects = collect_objects(&source).unwrap();
        assert!(objects.contains(&detached));
        assert_eq!(objects.len(), 10);
    }

    #[test]
    fn test_hash_mismatch_is_reported() {
        let dir = TempDir::new().unwrap();
        let source = Repository::init(dir.path()).unwrap();
        let real = source.blob(b"real content\n").unwrap();

        // store the loose file of `real` under a different name
        let fake = Oid::from_str("1111111111111111111111111111111111111111").unwrap();
        let objects_dir = source.path().join("objects");
        let real_hex = real.to_string();
        std::fs::create_dir_all(objects_dir.join("11")).unwrap();
        std::fs::copy(
            objects_dir.join(&real_hex[..2]).join(&real_hex[2..]),
            objects_dir.join("11").join(&fake.to_string()[2..]),
        )
        .unwrap();
        std::fs::write(source.path().join("refs/tags/odd"), format!("{}\n", fake)).unwrap();

        // libgit2 would otherwise refuse to read the misnamed object
        git2::opts::strict_hash_verification(false);

        let repo = target();
        let report = Importer::new(&repo, ImportOptions::new(dir.path())).run().unwrap();

        assert_eq!(report.objects_imported, 1);
        assert_eq!(
            report.mismatches,
            vec![HashMismatch {
                expected: ObjectId::from(fake),
                actual: ObjectId::from(real),
            }]
        );
        assert!(!report.is_clean());
        assert!(repo.new_object_reader().has_object(&ObjectId::from(real)).unwrap());
        assert!(!repo.new_object_reader().has_object(&ObjectId::from(fake)).unwrap());
    }

    fn read_only_target() -> SqlRepository {
        let repo = target();
        repo.with_conn(|conn| {
            conn.execute_batch("PRAGMA query_only = ON")?;
            Ok(())
        })
        .unwrap();
        repo
    }

    #[test]
    fn test_unwritable_database_aborts_object_import() {
        let fixture = source_repo();
        let repo = read_only_target();

        let options = ImportOptions::new(&fixture.path).recreate(false);
        match Importer::new(&repo, options).run() {
            Err(ImportError::Storage(e)) => assert!(e.is_connection_failure(), "{:?}", e),
            other => panic!("expected storage error, got {:?}", other),
        }
    }

    #[test]
    fn test_unwritable_database_aborts_ref_import() {
        let dir = TempDir::new().unwrap();
        let source = Repository::init(dir.path()).unwrap();
        // no objects at all, so the first write is the ref
        source
            .reference_symbolic("refs/heads/alias", "refs/heads/trunk", false, "alias")
            .unwrap();

        let repo = read_only_target();
        let options = ImportOptions::new(dir.path()).recreate(false);
        match Importer::new(&repo, options).run() {
            Err(ImportError::Storage(e)) => assert!(e.is_connection_failure(), "{:?}", e),
            other => panic!("expected storage error, got {:?}", other),
        }
    }
}
