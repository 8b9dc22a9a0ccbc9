//! Reference updates.
//!
//! A [`RefUpdate`] captures the state of a ref when it is created, decides
//! what the update means (new ref, fast-forward, forced, no-op) and then
//! issues one conditioned write. If the row changed in between, the write
//! touches nothing and the update reports [`RefUpdateResult::Rejected`].
//!
//! There is no real lock behind [`RefDatabase::try_lock`]; the conditioned
//! write is the only concurrency control.

use std::fmt;

use serde::Serialize;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::refs::{RefState, MAX_SYMBOLIC_DEPTH};
use crate::storage::traits::RefDatabase;
use crate::storage::types::{ObjectId, RefName};

/// Outcome of a ref update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefUpdateResult {
    /// the update has not run yet
    NotAttempted,
    /// the ref did not exist and was created
    New,
    /// the ref moved to a descendant of its old value
    FastForward,
    /// the ref was overwritten (or deleted) unconditionally
    Forced,
    /// the ref already had the requested value
    NoChange,
    /// the ref changed underneath us, or the update was not allowed
    Rejected,
    /// the lock could not be taken or the expected old value did not match
    LockFailure,
    /// the write failed with a storage error
    IoFailure,
}

impl RefUpdateResult {
    /// true for the outcomes that leave the ref as requested
    pub fn is_success(self) -> bool {
        matches!(
            self,
            Self::New | Self::FastForward | Self::Forced | Self::NoChange
        )
    }
}

impl fmt::Display for RefUpdateResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotAttempted => "not attempted",
            Self::New => "new",
            Self::FastForward => "fast-forward",
            Self::Forced => "forced",
            Self::NoChange => "no change",
            Self::Rejected => "rejected",
            Self::LockFailure => "lock failure",
            Self::IoFailure => "io failure",
        };
        write!(f, "{}", s)
    }
}

/// One attempt to change a ref.
///
/// Without `detach`, updating a symbolic ref updates the ref at the end of
/// its chain (so updating `HEAD` moves the current branch). With `detach`,
/// the named ref itself is replaced by a direct value.
pub struct RefUpdate<D: RefDatabase> {
    db: D,
    name: String,
    target_name: String,
    detach: bool,
    old: RefState,
    new_id: Option<ObjectId>,
    expected_old: Option<ObjectId>,
    force: bool,
    fast_forward: bool,
    result: RefUpdateResult,
}

impl<D: RefDatabase> RefUpdate<D> {
    /// Seed an update of `name` from the database's current state.
    pub fn new(db: D, name: &str, detach: bool) -> StorageResult<Self> {
        let name = RefName::new(name)?.into_string();
        let (target_name, old) = if detach {
            let state = db.read_state(&name)?;
            (name.clone(), state)
        } else {
            follow_links(&db, &name)?
        };

        Ok(Self {
            db,
            name,
            target_name,
            detach,
            old,
            new_id: None,
            expected_old: None,
            force: false,
            fast_forward: false,
            result: RefUpdateResult::NotAttempted,
        })
    }

    /// the name the update was requested for
    pub fn name(&self) -> &str {
        &self.name
    }

    /// the ref row the update will write
    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    pub fn is_detaching(&self) -> bool {
        self.detach
    }

    /// state of the written row when the update was seeded
    pub fn old_state(&self) -> &RefState {
        &self.old
    }

    /// the old object id, if the written row was a direct ref
    pub fn old_object_id(&self) -> Option<ObjectId> {
        match self.old {
            RefState::Direct(id) => Some(id),
            _ => None,
        }
    }

    pub fn new_object_id(&self) -> Option<ObjectId> {
        self.new_id
    }

    pub fn set_new_object_id(&mut self, id: ObjectId) {
        self.new_id = Some(id);
    }

    /// Require the ref to still hold `id` (zero id: require it to be absent).
    pub fn set_expected_old_object_id(&mut self, id: ObjectId) {
        self.expected_old = Some(id);
    }

    /// Allow overwriting a ref that is not being fast-forwarded.
    pub fn set_force_update(&mut self, force: bool) {
        self.force = force;
    }

    /// Declare that the new value descends from the old one.
    ///
    /// Ancestry is not checked here; the caller owns the object graph.
    pub fn set_fast_forward(&mut self, fast_forward: bool) {
        self.fast_forward = fast_forward;
    }

    pub fn result(&self) -> RefUpdateResult {
        self.result
    }

    /// Point the ref at the new object id.
    pub fn update(&mut self) -> StorageResult<RefUpdateResult> {
        self.begin()?;
        let new_id = self.new_id.ok_or_else(|| StorageError::InvalidUpdate {
            name: self.name.clone(),
            reason: "no new object id set".to_string(),
        })?;

        self.locked(|this| {
            if !this.expected_old_matches() {
                return Ok(RefUpdateResult::LockFailure);
            }

            let tentative = match &this.old {
                RefState::Missing => RefUpdateResult::New,
                RefState::Direct(old) if *old == new_id => return Ok(RefUpdateResult::NoChange),
                RefState::Direct(_) if this.force => RefUpdateResult::Forced,
                RefState::Direct(_) if this.fast_forward => RefUpdateResult::FastForward,
                RefState::Direct(_) => return Ok(RefUpdateResult::Rejected),
                RefState::Symbolic(_) => RefUpdateResult::Forced,
            };

            let changed = this.db.write_direct(&this.target_name, &this.old, &new_id)?;
            Ok(if changed == 0 { RefUpdateResult::Rejected } else { tentative })
        })
    }

    /// Delete the ref.
    pub fn delete(&mut self) -> StorageResult<RefUpdateResult> {
        self.begin()?;
        self.locked(|this| {
            if !this.expected_old_matches() {
                return Ok(RefUpdateResult::LockFailure);
            }
            if !this.old.exists() {
                return Ok(RefUpdateResult::Rejected);
            }

            let changed = this.db.remove(&this.target_name, &this.old)?;
            Ok(if changed == 0 { RefUpdateResult::Rejected } else { RefUpdateResult::Forced })
        })
    }

    /// Create the named ref as a symbolic link to `target`.
    ///
    /// This is a plain insert: linking a name that already exists fails
    /// with a constraint violation instead of replacing the row.
    pub fn link(&mut self, target: &str) -> StorageResult<RefUpdateResult> {
        self.begin()?;
        let target = RefName::new(target)?;
        let name = self.name.clone();
        self.locked_on(&name, |this| {
            let changed = this.db.write_symbolic(&this.name, target.as_str())?;
            Ok(if changed == 0 { RefUpdateResult::Rejected } else { RefUpdateResult::New })
        })
    }

    fn begin(&self) -> StorageResult<()> {
        if self.result != RefUpdateResult::NotAttempted {
            return Err(StorageError::InvalidUpdate {
                name: self.name.clone(),
                reason: format!("update already ran ({})", self.result),
            });
        }
        Ok(())
    }

    fn expected_old_matches(&self) -> bool {
        match self.expected_old {
            None => true,
            Some(expected) => self.old_object_id().unwrap_or_else(ObjectId::zero) == expected,
        }
    }

    fn locked<F>(&mut self, write: F) -> StorageResult<RefUpdateResult>
    where
        F: FnOnce(&Self) -> StorageResult<RefUpdateResult>,
    {
        let name = self.target_name.clone();
        self.locked_on(&name, write)
    }

    fn locked_on<F>(&mut self, lock_name: &str, write: F) -> StorageResult<RefUpdateResult>
    where
        F: FnOnce(&Self) -> StorageResult<RefUpdateResult>,
    {
        let outcome = match self.db.try_lock(lock_name) {
            Ok(false) => Ok(RefUpdateResult::LockFailure),
            Ok(true) => {
                let outcome = write(self);
                self.db.unlock(lock_name);
                outcome
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(result) => {
                self.result = result;
                Ok(result)
            }
            Err(e) => {
                self.result = RefUpdateResult::IoFailure;
                Err(e)
            }
        }
    }
}

/// Walk symbolic links from `name` to the row an update should write.
///
/// Unlike resolution, a dangling link is fine here: the missing target is
/// where the new ref gets created (e.g. the first commit on `HEAD`).
fn follow_links<D: RefDatabase + ?Sized>(db: &D, name: &str) -> StorageResult<(String, RefState)> {
    let mut chain = vec![name.to_string()];
    loop {
        let current = chain[chain.len() - 1].clone();
        match db.read_state(&current)? {
            RefState::Symbolic(target) => {
                if chain.contains(&target) {
                    chain.push(target);
                    return Err(StorageError::CyclicReference { chain });
                }
                if chain.len() > MAX_SYMBOLIC_DEPTH {
                    return Err(StorageError::SymbolicDepthExceeded {
                        name: name.to_string(),
                        max_depth: MAX_SYMBOLIC_DEPTH,
                    });
                }
                chain.push(target);
            }
            state => return Ok((current, state)),
        }
    }
}
