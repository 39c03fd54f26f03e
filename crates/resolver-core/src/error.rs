//! Error types for `resolver-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("unknown record type: {0:?}")]
  UnknownRecordType(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

// ─── Failure scope ───────────────────────────────────────────────────────────

/// How far a failure raised while staging one file should propagate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureScope {
  /// The byte stream was not valid in the requested encoding. The load may be
  /// retried once under Latin-1.
  Encoding,
  /// The file cannot be staged; skip it and continue with the archive.
  File,
  /// Abort the whole dataset; the run continues with the next one.
  Dataset,
}

/// Implemented by store error types so the archive orchestrator can decide
/// whether to retry, skip a file, or abandon a dataset without knowing the
/// concrete backend.
pub trait ScopedFailure {
  fn scope(&self) -> FailureScope;
}
