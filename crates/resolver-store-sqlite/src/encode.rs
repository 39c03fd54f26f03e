//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Dates are stored as `YYYY-MM-DD` strings. Record payloads are stored as
//! compact JSON objects. Record types are stored as their lower-case tag.

use chrono::NaiveDate;
use resolver_core::record::{
  CanonicalObject, Dataset, HistoryEntry, ObjectData, RecordType, StagedRecord,
};

use crate::{Error, Result};

// ─── NaiveDate ───────────────────────────────────────────────────────────────

const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn encode_date(date: NaiveDate) -> String { date.format(DATE_FORMAT).to_string() }

pub fn decode_date(s: &str) -> Result<NaiveDate> {
  NaiveDate::parse_from_str(s, DATE_FORMAT).map_err(|e| Error::DateParse(format!("{s:?}: {e}")))
}

// ─── ObjectData ──────────────────────────────────────────────────────────────

pub fn encode_data(data: &ObjectData) -> Result<String> { Ok(serde_json::to_string(data)?) }

pub fn decode_data(s: &str) -> Result<ObjectData> { Ok(serde_json::from_str(s)?) }

/// Encode a list of strings as a JSON array, for `json_each(?)` parameters.
pub fn encode_id_list<'a>(ids: impl IntoIterator<Item = &'a String>) -> Result<String> {
  Ok(serde_json::to_string(&ids.into_iter().collect::<Vec<_>>())?)
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings read directly from an `objects` row.
pub struct RawObject {
  pub id:           String,
  pub parent:       Option<String>,
  pub record_type:  String,
  pub dataset_id:   String,
  pub data:         String,
  pub created_date: String,
  pub deleted_date: Option<String>,
}

/// Column list matching [`RawObject::from_row`].
pub const OBJECT_COLUMNS: &str =
  "id, parent, type, dataset_id, data, created_date, deleted_date";

impl RawObject {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:           row.get(0)?,
      parent:       row.get(1)?,
      record_type:  row.get(2)?,
      dataset_id:   row.get(3)?,
      data:         row.get(4)?,
      created_date: row.get(5)?,
      deleted_date: row.get(6)?,
    })
  }

  pub fn into_object(self) -> Result<CanonicalObject> {
    Ok(CanonicalObject {
      id:           self.id,
      parent:       self.parent,
      record_type:  self.record_type.parse::<RecordType>()?,
      dataset_id:   self.dataset_id,
      data:         decode_data(&self.data)?,
      created_date: decode_date(&self.created_date)?,
      deleted_date: self.deleted_date.as_deref().map(decode_date).transpose()?,
    })
  }
}

/// Raw strings read directly from a `migration` row.
pub struct RawStaged {
  pub id:          String,
  pub parent:      Option<String>,
  pub record_type: String,
  pub dataset_id:  String,
  pub data:        String,
}

impl RawStaged {
  pub fn into_staged(self) -> Result<StagedRecord> {
    Ok(StagedRecord {
      id:          self.id,
      parent:      self.parent,
      record_type: self.record_type.parse::<RecordType>()?,
      dataset_id:  self.dataset_id,
      data:        decode_data(&self.data)?,
    })
  }
}

/// Raw strings read directly from a `history` row.
pub struct RawHistory {
  pub history_id:   i64,
  pub object_id:    String,
  pub changed_data: String,
  pub changed_date: String,
}

impl RawHistory {
  pub fn into_entry(self) -> Result<HistoryEntry> {
    Ok(HistoryEntry {
      history_id:   self.history_id,
      object_id:    self.object_id,
      changed_data: decode_data(&self.changed_data)?,
      changed_date: decode_date(&self.changed_date)?,
    })
  }
}

/// Raw strings read directly from a `datasets` row.
pub struct RawDataset {
  pub id:           String,
  pub data:         String,
  pub deleted_date: Option<String>,
}

impl RawDataset {
  pub fn into_dataset(self) -> Result<Dataset> {
    Ok(Dataset {
      id:           self.id,
      data:         decode_data(&self.data)?,
      deleted_date: self.deleted_date.as_deref().map(decode_date).transpose()?,
    })
  }
}
