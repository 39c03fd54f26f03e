//! SQLite backend for the occurrence resolver.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Staged files, the migration
//! accumulator and the canonical object store all live in one database file.

mod accumulate;
mod encode;
mod functions;
mod normalize;
mod schema;
mod staging;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;
