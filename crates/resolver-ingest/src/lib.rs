//! Ingestion pipeline for the occurrence resolver.
//!
//! Walks a dataset catalog, stages every dataset's Darwin Core archive into
//! the migration accumulator of a [`ResolverStore`], then reconciles the
//! accumulator against the canonical objects.
//!
//! [`ResolverStore`]: resolver_core::store::ResolverStore

pub mod archive;
pub mod catalog;
pub mod config;
pub mod context;
pub mod duplicates;
pub mod error;
pub mod run;

pub use error::{Error, Result};
