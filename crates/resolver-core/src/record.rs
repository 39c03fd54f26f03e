//! Record types: the entities the resolver stores and reconciles.
//!
//! A canonical object is the durable, addressable record clients resolve by
//! id. Staged records are its per-run counterpart: one run's worth of
//! normalized rows awaiting reconciliation.

use std::{fmt, str::FromStr};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Semi-structured record payload. Publisher schemas are heterogeneous, so
/// the payload stays an open string-keyed map of JSON scalars.
pub type ObjectData = serde_json::Map<String, serde_json::Value>;

// ─── Record type ─────────────────────────────────────────────────────────────

/// The record-type tag of a canonical object.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RecordType {
  Event,
  Occurrence,
  Taxon,
  MeasurementOrFact,
  Dataset,
}

impl RecordType {
  /// Record types that may act as the core of an archive, highest precedence
  /// first.
  pub const CORE_PRECEDENCE: [RecordType; 3] =
    [Self::Event, Self::Occurrence, Self::Taxon];

  /// The tag stored in the `type` column.
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Event => "event",
      Self::Occurrence => "occurrence",
      Self::Taxon => "taxon",
      Self::MeasurementOrFact => "measurementorfact",
      Self::Dataset => "dataset",
    }
  }

  /// The Darwin Core term holding this record type's identifier, lower-cased
  /// as staging columns are.
  pub fn id_column(self) -> Option<&'static str> {
    match self {
      Self::Event => Some("eventid"),
      Self::Occurrence => Some("occurrenceid"),
      Self::Taxon => Some("taxonid"),
      Self::MeasurementOrFact => Some("measurementid"),
      Self::Dataset => None,
    }
  }

  /// Map an archive entry name to its record type. Only the four exact
  /// entry names are recognised; everything else in a bundle is ignored.
  pub fn from_archive_entry(name: &str) -> Option<Self> {
    match name {
      "event.txt" => Some(Self::Event),
      "occurrence.txt" => Some(Self::Occurrence),
      "taxon.txt" => Some(Self::Taxon),
      "measurementorfact.txt" => Some(Self::MeasurementOrFact),
      _ => None,
    }
  }

  /// Pick the core record type among the types present in one archive.
  pub fn core_of(present: &[RecordType]) -> Option<RecordType> {
    Self::CORE_PRECEDENCE
      .into_iter()
      .find(|candidate| present.contains(candidate))
  }
}

impl fmt::Display for RecordType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for RecordType {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "event" => Ok(Self::Event),
      "occurrence" => Ok(Self::Occurrence),
      "taxon" => Ok(Self::Taxon),
      "measurementorfact" => Ok(Self::MeasurementOrFact),
      "dataset" => Ok(Self::Dataset),
      other => Err(Error::UnknownRecordType(other.to_owned())),
    }
  }
}

// ─── Canonical object ────────────────────────────────────────────────────────

/// A persisted, resolvable record. Never removed: `deleted_date` marks it
/// logically deleted and is cleared again if the record reappears.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalObject {
  /// Normalized, lower-case identifier; case-insensitively unique.
  pub id:           String,
  /// Identifier of the core record this one belongs to, if any.
  pub parent:       Option<String>,
  pub record_type:  RecordType,
  pub dataset_id:   String,
  pub data:         ObjectData,
  pub created_date: NaiveDate,
  pub deleted_date: Option<NaiveDate>,
}

impl CanonicalObject {
  pub fn is_live(&self) -> bool { self.deleted_date.is_none() }
}

// ─── History ─────────────────────────────────────────────────────────────────

/// Append-only record of the fields a merge changed on one object.
///
/// `changed_data` maps each changed field to its previous value, or to
/// `null` when the field did not exist before.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
  pub history_id:   i64,
  pub object_id:    String,
  pub changed_data: ObjectData,
  pub changed_date: NaiveDate,
}

// ─── Staged migration record ─────────────────────────────────────────────────

/// A normalized row in the migration accumulator. Valid only within the run
/// that staged it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedRecord {
  pub id:          String,
  pub parent:      Option<String>,
  pub record_type: RecordType,
  pub dataset_id:  String,
  pub data:        ObjectData,
}

// ─── Dataset ─────────────────────────────────────────────────────────────────

/// Metadata key holding a dataset's last-modified stamp.
pub const DATASET_MODIFIED_KEY: &str = "modified";

/// Catalog metadata for one published dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
  /// External catalog key.
  pub id:           String,
  pub data:         ObjectData,
  pub deleted_date: Option<NaiveDate>,
}

/// Outcome of synchronising a dataset's catalog metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetSync {
  Created,
  Updated,
  /// The stored `modified` stamp matches the catalog; nothing was written and
  /// the dataset need not be re-ingested.
  Unchanged,
}

impl DatasetSync {
  pub fn needs_ingest(self) -> bool { !matches!(self, Self::Unchanged) }
}

// ─── Duplicate record ────────────────────────────────────────────────────────

/// An identifier collision detected while accumulating a file: the new row
/// was dropped in favour of the row accumulated earlier in the same run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateRecord {
  pub id:             String,
  pub new_data:       ObjectData,
  pub new_dataset_id: String,
  pub new_type:       RecordType,
  pub old_data:       ObjectData,
  pub old_dataset_id: String,
}

/// Destination for duplicate records. Called synchronously from the store's
/// database thread while a file is being accumulated.
pub trait DuplicateSink: Send + Sync {
  fn record(&self, duplicate: &DuplicateRecord) -> std::io::Result<()>;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn core_precedence_prefers_event() {
    let present = [RecordType::Occurrence, RecordType::Event];
    assert_eq!(RecordType::core_of(&present), Some(RecordType::Event));

    let present = [RecordType::MeasurementOrFact, RecordType::Taxon];
    assert_eq!(RecordType::core_of(&present), Some(RecordType::Taxon));
  }

  #[test]
  fn measurements_alone_have_no_core() {
    assert_eq!(RecordType::core_of(&[RecordType::MeasurementOrFact]), None);
  }

  #[test]
  fn archive_entries_are_matched_exactly() {
    assert_eq!(
      RecordType::from_archive_entry("occurrence.txt"),
      Some(RecordType::Occurrence)
    );
    assert_eq!(RecordType::from_archive_entry("Occurrence.txt"), None);
    assert_eq!(RecordType::from_archive_entry("multimedia.txt"), None);
    assert_eq!(RecordType::from_archive_entry("eml.xml"), None);
  }

  #[test]
  fn id_columns() {
    assert_eq!(RecordType::MeasurementOrFact.id_column(), Some("measurementid"));
    assert_eq!(RecordType::Occurrence.id_column(), Some("occurrenceid"));
    assert_eq!(RecordType::Dataset.id_column(), None);
  }

  #[test]
  fn tag_round_trips_through_from_str() {
    for t in [
      RecordType::Event,
      RecordType::Occurrence,
      RecordType::Taxon,
      RecordType::MeasurementOrFact,
      RecordType::Dataset,
    ] {
      assert_eq!(t.as_str().parse::<RecordType>().unwrap(), t);
    }
    assert!("measurement".parse::<RecordType>().is_err());
  }
}
