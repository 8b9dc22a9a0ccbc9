//! gitsql - Git object storage on SQL
//!
//! This crate stores the objects and references of a bare Git repository in
//! two SQL tables instead of `.git/`. Objects are addressed by their SHA-1
//! exactly as Git does it, so ids computed here match `git hash-object`.
//!
//! # Example
//!
//! ```no_run
//! use gitsql::db::RepositoryConfig;
//! use gitsql::storage::SqlRepository;
//!
//! let repo = SqlRepository::open(RepositoryConfig::new("repo.db")).unwrap();
//! println!("{}", repo.stats().unwrap());
//! ```

pub mod db;
pub mod import;
pub mod storage;
