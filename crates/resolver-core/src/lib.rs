//! Domain types, identifier cleanup and the merge engine for the occurrence
//! resolver.
//!
//! Nothing here touches a database or an archive. Storage backends implement
//! [`store::ResolverStore`]; the merge engine in [`merge`] runs against any of
//! them.

pub mod diff;
pub mod error;
pub mod identifier;
pub mod merge;
pub mod record;
pub mod store;

pub use error::{Error, Result};
