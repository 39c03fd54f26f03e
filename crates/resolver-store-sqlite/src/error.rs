//! Error type for `resolver-store-sqlite`.

use resolver_core::error::{FailureScope, ScopedFailure};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] resolver_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("i/o error: {0}")]
  Io(#[from] std::io::Error),

  #[error("delimited file error: {0}")]
  Csv(#[from] csv::Error),

  #[error("date parse error: {0}")]
  DateParse(String),

  /// A field on this line is not valid in the requested encoding.
  #[error("invalid character encoding on line {line}")]
  Encoding { line: u64 },

  #[error("malformed file: {0}")]
  MalformedFile(String),

  #[error("identifier column {0:?} is missing from the staged file")]
  MissingIdColumn(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl ScopedFailure for Error {
  fn scope(&self) -> FailureScope {
    match self {
      Error::Encoding { .. } => FailureScope::Encoding,
      Error::MalformedFile(_) | Error::Csv(_) => FailureScope::File,
      _ => FailureScope::Dataset,
    }
  }
}
