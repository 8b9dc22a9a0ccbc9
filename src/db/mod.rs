//! Configuration and connection provisioning.
//!
//! Connections are supplied to the storage layer from here; the stores
//! themselves never decide where the database lives.

mod config;
mod connection;

pub use config::{RepositoryConfig, IN_MEMORY};
pub use connection::open_connection;
